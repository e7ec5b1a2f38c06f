//! DocumentStore port - key/value ドキュメントストア（bucket）
//!
//! # 実装
//! - **InMemoryBucket**: `mem://` 接続（開発・テスト用）
//! - **FsBucket**: `file://` 接続（1 ドキュメント = 1 ファイル）

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::DocKey;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert never overwrites. A live document under the key is a conflict.
    #[error("document already exists: {0}")]
    AlreadyExists(DocKey),

    #[error("invalid document key: {0}")]
    InvalidKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Document time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    #[default]
    Never,
    After(Duration),
}

impl Expiry {
    /// `0` means no expiry.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Expiry::Never
        } else {
            Expiry::After(Duration::from_secs(secs))
        }
    }
}

/// A bucket in the document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `body` under `key`. Fails with `AlreadyExists` instead of overwriting.
    async fn insert(&self, key: &DocKey, body: &[u8], expiry: Expiry) -> Result<(), StoreError>;

    /// Fetch a live document.
    async fn get(&self, key: &DocKey) -> Result<Option<Vec<u8>>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seconds_means_no_expiry() {
        assert_eq!(Expiry::from_secs(0), Expiry::Never);
        assert_eq!(Expiry::from_secs(30), Expiry::After(Duration::from_secs(30)));
    }

    #[test]
    fn conflict_is_detectable() {
        assert!(StoreError::AlreadyExists(DocKey::new("k")).is_conflict());
        assert!(!StoreError::Unavailable("down".into()).is_conflict());
    }
}
