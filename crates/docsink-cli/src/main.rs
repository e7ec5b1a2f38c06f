//! docsink - 標準入力の行をループバック queue に流し、ドキュメントストアへ保存する CLI
//!
//! # 使い方
//! ```text
//! cat events.jsonl | docsink --topic events --connection-string mem:// \
//!     --bucket docs --nsqd-tcp-address 127.0.0.1:4150 --key-fields uid
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use docsink_core::config::ConnectorConfig;
use docsink_core::impls::InMemoryMessageSource;
use docsink_core::{ConnectorBuilder, DocsinkError, telemetry};

#[derive(Parser, Debug)]
#[command(name = "docsink", version, about = "Consume queue messages into a document store")]
struct Cli {
    /// TOML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Document store connection string (mem:// or file://<root>)
    #[arg(long = "connection-string", alias = "connStr")]
    connection_string: Option<String>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long = "bucket-password", alias = "bucketPwd")]
    bucket_password: Option<String>,

    /// Document expiry in seconds (0 = never)
    #[arg(long = "expiry-secs")]
    expiry_secs: Option<u64>,

    #[arg(long)]
    topic: Option<String>,

    /// Defaults to an ephemeral channel
    #[arg(long)]
    channel: Option<String>,

    #[arg(long = "max-in-flight")]
    max_in_flight: Option<usize>,

    /// Parse message bodies as JSON objects
    #[arg(long, action = ArgAction::Set)]
    json: Option<bool>,

    /// Key fields in priority order (repeatable)
    #[arg(long = "key-fields", alias = "key-field")]
    key_fields: Vec<String>,

    #[arg(long = "nsqd-tcp-address", alias = "direct-address")]
    direct_addresses: Vec<String>,

    #[arg(long = "lookupd-http-address", alias = "discovery-address")]
    discovery_addresses: Vec<String>,

    /// Pass-through consumer option as `name,value` (repeatable)
    #[arg(long = "consumer-opt")]
    consumer_opts: Vec<String>,
}

impl Cli {
    fn into_config(self) -> Result<ConnectorConfig, DocsinkError> {
        let mut config = match &self.config {
            Some(path) => ConnectorConfig::from_toml_file(path)?,
            None => ConnectorConfig::default(),
        };

        if self.connection_string.is_some() {
            config.store.connection_string = self.connection_string;
        }
        if self.bucket.is_some() {
            config.store.bucket = self.bucket;
        }
        if self.bucket_password.is_some() {
            config.store.bucket_password = self.bucket_password;
        }
        if let Some(secs) = self.expiry_secs {
            config.store.document_expiry_secs = secs;
        }
        if self.topic.is_some() {
            config.consumer.topic = self.topic;
        }
        if self.channel.is_some() {
            config.consumer.channel = self.channel;
        }
        if let Some(max) = self.max_in_flight {
            config.consumer.max_in_flight = max;
        }
        if !self.direct_addresses.is_empty() {
            config.consumer.direct_addresses = self.direct_addresses;
        }
        if !self.discovery_addresses.is_empty() {
            config.consumer.discovery_addresses = self.discovery_addresses;
        }
        config.consumer.options.extend(self.consumer_opts);
        if let Some(json) = self.json {
            config.keys.json = json;
        }
        if !self.key_fields.is_empty() {
            config.keys.key_fields = self.key_fields;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("docsink: {e}");
            1
        }
    };
    // stdin の blocking 読み取りを待たずに終了する
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), DocsinkError> {
    let config = cli.into_config()?.validate()?;
    let connector = ConnectorBuilder::new(config).build()?;

    let feeder = tokio::spawn(feed_stdin(Arc::clone(&connector.source)));
    let group = connector.start();
    let stats = group.stats();

    let shutdown = group.shutdown_handle();
    let source = Arc::clone(&connector.source);
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        source.close();
        shutdown.request();
    });

    group.join().await;
    feeder.abort();
    signals.abort();

    let counts = stats.snapshot();
    info!(
        stored = counts.stored,
        dropped = counts.dropped,
        requeued = counts.requeued,
        transport_failures = counts.transport_failures,
        "consumer stopped"
    );
    match serde_json::to_string(&counts) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "failed to encode delivery counts"),
    }
    Ok(())
}

/// Publish each non-empty stdin line, then close the source.
async fn feed_stdin(source: Arc<InMemoryMessageSource>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = source.publish(line.into_bytes()) {
                    warn!(error = %e, "stopped reading stdin");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        }
    }
    info!("stdin exhausted, closing source");
    source.close();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("received shutdown signal");
}
