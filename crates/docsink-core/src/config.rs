//! Connector configuration.
//!
//! `ConnectorConfig` is the raw, deserializable shape (TOML file plus CLI
//! overrides). `validate()` turns it into a `ValidatedConfig`, which is built
//! once at startup and only read afterwards.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::KeyFieldList;
use crate::ports::Expiry;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 200;
pub const DEFAULT_REQUEUE_DELAY_CAP: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("a direct transport address or a discovery address is required")]
    NoTransportAddress,

    #[error("use direct transport addresses or discovery addresses, not both")]
    ConflictingTransportAddresses,

    #[error("max_in_flight must be at least 1")]
    InvalidMaxInFlight,

    #[error("invalid consumer option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level connector configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub store: StoreConfig,
    pub consumer: ConsumerConfig,
    pub keys: KeysConfig,
}

/// Document store connection and bucket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub connection_string: Option<String>,
    pub bucket: Option<String>,
    pub bucket_password: Option<String>,
    /// Document TTL in seconds, 0 = never expires.
    pub document_expiry_secs: u64,
}

/// Queue consumer subscription and transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub topic: Option<String>,
    /// Ephemeral channel name is generated when unset.
    pub channel: Option<String>,
    pub max_in_flight: usize,
    pub direct_addresses: Vec<String>,
    pub discovery_addresses: Vec<String>,
    /// Pass-through transport options, `name,value` or `name=value`.
    pub options: Vec<String>,
    pub user_agent: Option<String>,
}

/// Key resolution policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub json: bool,
    pub key_fields: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: None,
            channel: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            direct_addresses: Vec::new(),
            discovery_addresses: Vec::new(),
            options: Vec::new(),
            user_agent: None,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            json: true,
            key_fields: Vec::new(),
        }
    }
}

/// How the consumer finds the queue transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAddrs {
    Direct(Vec<String>),
    Discovery(Vec<String>),
}

impl TransportAddrs {
    pub fn mode(&self) -> &'static str {
        match self {
            TransportAddrs::Direct(_) => "direct",
            TransportAddrs::Discovery(_) => "discovery",
        }
    }

    pub fn addresses(&self) -> &[String] {
        match self {
            TransportAddrs::Direct(addrs) | TransportAddrs::Discovery(addrs) => addrs,
        }
    }
}

/// Options handed to the queue transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Admission-control limit on unacknowledged deliveries.
    pub max_in_flight: usize,
    /// 0 = unlimited.
    pub max_attempts: u16,
    pub requeue_delay_cap: Duration,
    pub user_agent: String,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_attempts: 0,
            requeue_delay_cap: DEFAULT_REQUEUE_DELAY_CAP,
            user_agent: default_user_agent(),
        }
    }
}

impl ConsumerOptions {
    /// Apply one pass-through option string.
    pub fn set(&mut self, raw: &str) -> Result<(), ConfigError> {
        let (name, value) = raw.split_once([',', '=']).unwrap_or((raw, ""));
        let name = name.trim();
        let value = value.trim();
        let invalid = |reason: String| ConfigError::InvalidOption {
            option: raw.to_string(),
            reason,
        };

        match name {
            "max_attempts" => {
                self.max_attempts = value.parse().map_err(|e| invalid(format!("{e}")))?;
            }
            "requeue_delay_cap_ms" => {
                let ms: u64 = value.parse().map_err(|e| invalid(format!("{e}")))?;
                self.requeue_delay_cap = Duration::from_millis(ms);
            }
            _ => return Err(invalid("unknown option".to_string())),
        }
        Ok(())
    }
}

pub fn default_user_agent() -> String {
    format!("docsink/{}", env!("CARGO_PKG_VERSION"))
}

/// Random ephemeral channel name, e.g. `docsink004217#ephemeral`.
pub fn ephemeral_channel() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..999_999);
    format!("docsink{n:06}#ephemeral")
}

/// Configuration after validation. Immutable, shared by reference.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub connection_string: String,
    pub bucket: String,
    pub bucket_password: Option<String>,
    pub expiry: Expiry,
    pub topic: String,
    pub channel: String,
    pub addrs: TransportAddrs,
    pub json: bool,
    pub key_fields: KeyFieldList,
    pub consumer: ConsumerOptions,
}

impl ConnectorConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Fail-fast validation. Checks run in the order an operator would fix them.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let topic = required(&self.consumer.topic, "topic")?;
        let connection_string = required(&self.store.connection_string, "connection string")?;
        let bucket = required(&self.store.bucket, "bucket")?;

        let direct = non_empty(&self.consumer.direct_addresses);
        let discovery = non_empty(&self.consumer.discovery_addresses);
        let addrs = match (direct.is_empty(), discovery.is_empty()) {
            (true, true) => return Err(ConfigError::NoTransportAddress),
            (false, false) => return Err(ConfigError::ConflictingTransportAddresses),
            (false, true) => TransportAddrs::Direct(direct),
            (true, false) => TransportAddrs::Discovery(discovery),
        };

        if self.consumer.max_in_flight == 0 {
            return Err(ConfigError::InvalidMaxInFlight);
        }
        let mut consumer = ConsumerOptions {
            max_in_flight: self.consumer.max_in_flight,
            user_agent: self
                .consumer
                .user_agent
                .clone()
                .unwrap_or_else(default_user_agent),
            ..ConsumerOptions::default()
        };
        for option in &self.consumer.options {
            consumer.set(option)?;
        }

        let channel = self
            .consumer
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(ephemeral_channel);

        Ok(ValidatedConfig {
            connection_string,
            bucket,
            bucket_password: self
                .store
                .bucket_password
                .clone()
                .filter(|p| !p.is_empty()),
            expiry: Expiry::from_secs(self.store.document_expiry_secs),
            topic,
            channel,
            addrs,
            json: self.keys.json,
            key_fields: non_empty(&self.keys.key_fields).into_iter().collect(),
            consumer,
        })
    }
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing(name))
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn minimal() -> ConnectorConfig {
        let mut config = ConnectorConfig::default();
        config.consumer.topic = Some("events".into());
        config.store.connection_string = Some("mem://".into());
        config.store.bucket = Some("docs".into());
        config.consumer.direct_addresses = vec!["127.0.0.1:4150".into()];
        config
    }

    #[test]
    fn default_config_values() {
        let config = ConnectorConfig::default();
        assert_eq!(config.consumer.max_in_flight, 200);
        assert!(config.keys.json);
        assert!(config.keys.key_fields.is_empty());
        assert_eq!(config.store.document_expiry_secs, 0);
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            [store]
            connection_string = "file:///var/lib/docsink"
            bucket = "events"
            document_expiry_secs = 3600

            [consumer]
            topic = "orders"
            channel = "archive"
            max_in_flight = 50
            discovery_addresses = ["10.0.0.1:4161", "10.0.0.2:4161"]
            options = ["max_attempts,10"]

            [keys]
            json = true
            key_fields = ["orderId", "id"]
        "#;
        let config = ConnectorConfig::from_toml_str(toml_str).unwrap();
        let valid = config.validate().unwrap();

        assert_eq!(valid.topic, "orders");
        assert_eq!(valid.channel, "archive");
        assert_eq!(valid.consumer.max_in_flight, 50);
        assert_eq!(valid.consumer.max_attempts, 10);
        assert_eq!(valid.expiry, Expiry::from_secs(3600));
        assert_eq!(valid.addrs.mode(), "discovery");
        assert_eq!(valid.addrs.addresses().len(), 2);
        assert_eq!(valid.key_fields.iter().collect::<Vec<_>>(), vec!["orderId", "id"]);
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config = ConnectorConfig::from_toml_str("").unwrap();
        assert_eq!(config.consumer.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert!(config.keys.json);
    }

    #[rstest]
    #[case::topic("topic")]
    #[case::connection_string("connection string")]
    #[case::bucket("bucket")]
    fn missing_required_settings(#[case] name: &'static str) {
        let mut config = minimal();
        match name {
            "topic" => config.consumer.topic = None,
            "connection string" => config.store.connection_string = Some("  ".into()),
            _ => config.store.bucket = None,
        }
        assert!(matches!(config.validate(), Err(ConfigError::Missing(n)) if n == name));
    }

    #[test]
    fn transport_addresses_are_mutually_exclusive() {
        let mut config = minimal();
        config.consumer.discovery_addresses = vec!["127.0.0.1:4161".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConflictingTransportAddresses)
        ));

        config.consumer.direct_addresses.clear();
        config.consumer.discovery_addresses = vec!["".into()];
        assert!(matches!(config.validate(), Err(ConfigError::NoTransportAddress)));
    }

    #[test]
    fn zero_in_flight_is_rejected() {
        let mut config = minimal();
        config.consumer.max_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxInFlight)));
    }

    #[test]
    fn unset_channel_becomes_ephemeral() {
        let valid = minimal().validate().unwrap();
        assert!(valid.channel.starts_with("docsink"));
        assert!(valid.channel.ends_with("#ephemeral"));
        assert_eq!(valid.channel.len(), "docsink".len() + 6 + "#ephemeral".len());
    }

    #[test]
    fn empty_password_means_none() {
        let mut config = minimal();
        config.store.bucket_password = Some(String::new());
        assert_eq!(config.validate().unwrap().bucket_password, None);
    }

    #[rstest]
    #[case::comma("max_attempts,5", 5)]
    #[case::equals("max_attempts=7", 7)]
    fn consumer_option_syntax(#[case] raw: &str, #[case] expected: u16) {
        let mut options = ConsumerOptions::default();
        options.set(raw).unwrap();
        assert_eq!(options.max_attempts, expected);
    }

    #[rstest]
    #[case::unknown("snappy,true")]
    #[case::bad_value("max_attempts,many")]
    #[case::no_value("requeue_delay_cap_ms")]
    fn invalid_consumer_options(#[case] raw: &str) {
        let mut config = minimal();
        config.consumer.options = vec![raw.into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn user_agent_defaults_to_crate_version() {
        let valid = minimal().validate().unwrap();
        assert!(valid.consumer.user_agent.starts_with("docsink/"));
    }
}
