//! Errors - メッセージ単位のエラー型と分類
//!
//! # 分類
//! - Transient: 一時的なエラー（リトライ推奨）→ requeue
//! - Permanent: 恒久的なエラー（リトライ無意味）→ finish（drop）
//! - Infrastructure: transport 自体の障害

use thiserror::Error;

use super::key::DocKey;
use crate::ports::{QueueError, StoreError};

/// ErrorKind は実行エラーの運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// KeyError はキー解決の失敗
///
/// どの variant も内容に起因するため、再配送しても結果は変わらない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed JSON payload: {0}")]
    Parse(String),

    #[error("key field '{field}' must be a string, found {found}")]
    Type { field: String, found: &'static str },
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        KeyError::Parse(err.to_string())
    }
}

/// HandleError は DeliveryHandler が呼び出し元（ログ）に返すエラー
///
/// どの場合もメッセージの disposition は handler 内で済んでいる。
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("message dropped: {0}")]
    Dropped(#[source] KeyError),

    #[error("store failed for key '{key}', message requeued: {source}")]
    StoreFailed {
        key: DocKey,
        #[source]
        source: StoreError,
    },

    #[error("disposition failed: {0}")]
    Transport(#[from] QueueError),
}

impl HandleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandleError::Dropped(err) => err.kind(),
            HandleError::StoreFailed { .. } => ErrorKind::Transient,
            HandleError::Transport(_) => ErrorKind::Infrastructure,
        }
    }
}

/// serde_json::Value の型名（ログ・エラーメッセージ用）
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
