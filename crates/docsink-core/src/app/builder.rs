//! ConnectorBuilder - 検証済み設定から transport・store・handler を組み立てる
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 接続できなければ receive ループに入る前に失敗する
//! - テスト用の差し替え口（with_store, with_clock）

use std::sync::Arc;

use tracing::info;

use super::consumer::ConsumerGroup;
use super::handler::DeliveryHandler;
use super::resolver::KeyResolver;
use crate::config::ValidatedConfig;
use crate::error::DocsinkError;
use crate::impls::{InMemoryMessageSource, cluster};
use crate::ports::{Clock, DocumentStore, SystemClock, UlidKeyGenerator};

/// ConnectorBuilder は Connector を構築
///
/// # 使用例
/// ```ignore
/// let config = ConnectorConfig::from_toml_file("docsink.toml")?.validate()?;
/// let connector = ConnectorBuilder::new(config).build()?;
/// let group = connector.start();
/// ```
pub struct ConnectorBuilder {
    config: ValidatedConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl ConnectorBuilder {
    pub fn new(config: ValidatedConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            store: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use an already opened bucket instead of connecting by connection string.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connect both transports and wire the handler.
    ///
    /// # Errors
    /// - ストアに接続できない / bucket を開けない → `DocsinkError::Connect`
    /// - queue transport に接続できない → `DocsinkError::Queue`
    pub fn build(self) -> Result<Connector, DocsinkError> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => {
                let cluster = cluster::connect(&config.connection_string)?;
                let bucket = cluster.open_bucket(&config.bucket, config.bucket_password.as_deref())?;
                info!(bucket = %config.bucket, "bucket opened");
                bucket
            }
        };

        let source = InMemoryMessageSource::connect(
            &config.topic,
            &config.channel,
            &config.addrs,
            config.consumer.clone(),
        )?;

        let resolver = KeyResolver::new(
            config.json,
            config.key_fields.clone(),
            Arc::new(UlidKeyGenerator::new(Arc::clone(&self.clock))),
        );
        let handler = DeliveryHandler::new(resolver, Arc::clone(&store), config.expiry);

        Ok(Connector {
            config: Arc::new(config),
            source: Arc::new(source),
            store,
            handler: Arc::new(handler),
        })
    }
}

/// Connector は接続済みの transport・store と handler の組
pub struct Connector {
    pub config: Arc<ValidatedConfig>,
    pub source: Arc<InMemoryMessageSource>,
    pub store: Arc<dyn DocumentStore>,
    pub handler: Arc<DeliveryHandler>,
}

impl Connector {
    /// Start consuming.
    pub fn start(&self) -> ConsumerGroup {
        info!(
            topic = %self.config.topic,
            channel = %self.config.channel,
            json = self.config.json,
            key_fields = %self.config.key_fields,
            "starting consumer"
        );
        ConsumerGroup::spawn(
            Arc::clone(&self.source) as Arc<dyn crate::ports::MessageSource>,
            Arc::clone(&self.handler),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::error::ConnectError;

    fn config(conn: &str) -> ValidatedConfig {
        let mut config = ConnectorConfig::default();
        config.consumer.topic = Some("events".into());
        config.store.connection_string = Some(conn.into());
        config.store.bucket = Some("docs".into());
        config.consumer.direct_addresses = vec!["127.0.0.1:4150".into()];
        config.validate().unwrap()
    }

    #[test]
    fn build_with_memory_store() {
        let connector = ConnectorBuilder::new(config("mem://")).build().unwrap();
        assert_eq!(connector.source.topic(), "events");
        assert!(connector.handler.resolver().is_json());
    }

    #[test]
    fn build_fails_fast_on_unreachable_store() {
        let result = ConnectorBuilder::new(config("couchbase://db.invalid")).build();
        assert!(matches!(
            result,
            Err(DocsinkError::Connect(ConnectError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn build_fails_fast_on_missing_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let result =
            ConnectorBuilder::new(config(&format!("file://{}", tmp.path().display()))).build();
        assert!(matches!(
            result,
            Err(DocsinkError::Connect(ConnectError::Bucket { .. }))
        ));
    }
}
