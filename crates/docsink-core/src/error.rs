//! Startup errors. Anything here is fatal: the process exits before the
//! receive loop starts. Per-message errors live in `domain::errors`.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::ports::QueueError;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unsupported connection string '{0}' (expected mem:// or file://<dir>)")]
    UnsupportedScheme(String),

    #[error("cannot reach document store at {path}: {source}")]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bucket name '{0}'")]
    InvalidBucketName(String),

    #[error("cannot open bucket '{bucket}': {source}")]
    Bucket {
        bucket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication failed for bucket '{0}'")]
    Auth(String),
}

#[derive(Debug, Error)]
pub enum DocsinkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
