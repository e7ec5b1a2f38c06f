//! Message - キューから受け取るメッセージ
//!
//! # 学習ポイント
//! - ULID ベースの newtype ID（時刻でソート可能・分散生成可能）
//! - body は opaque な bytes として扱う（解釈は KeyResolver の責務）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a message assigned by the queue transport.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Message はキュー上の 1 件のメッセージ
///
/// # 所有権
/// - Message 自体は transport が保持する
/// - handler には `Delivery` 経由で参照だけが渡る
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Vec<u8>,

    /// Number of deliveries so far, including the current one.
    pub attempts: u16,

    /// When the message was published.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(id: MessageId, body: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            body,
            attempts: 0,
            timestamp,
        }
    }
}
