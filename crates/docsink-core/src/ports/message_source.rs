//! MessageSource port - キューの consumer 側
//!
//! # 設計原則
//! - 配送ハンドル（`Delivery`）は `finish` / `requeue` で消費される（`self: Box<Self>`）
//! - そのため 1 件のメッセージを二重に disposition するコードはコンパイルできない
//! - 「一度も disposition しない」ケースは transport 側が Drop で面倒を見る

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::MessageId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message source is closed")]
    Closed,

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// A message handed to a consumer, plus the right to acknowledge it.
///
/// The consumer owns this handle and must either `finish` or `requeue`.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn id(&self) -> MessageId;

    fn body(&self) -> &[u8];

    /// Delivery count including this one (1 on first delivery).
    fn attempts(&self) -> u16;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Stop the transport from responding on our behalf when the handle is
    /// dropped without an explicit disposition.
    fn disable_auto_ack(&mut self);

    /// Permanent acknowledgment.
    async fn finish(self: Box<Self>) -> Result<(), QueueError>;

    /// Return the message for redelivery after `delay` (zero = immediately).
    async fn requeue(self: Box<Self>, delay: Duration) -> Result<(), QueueError>;
}

/// Queue transport port (consumer side).
///
/// Admission control (the in-flight limit) is the transport's job:
/// `receive` simply does not return while too many deliveries are outstanding.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next delivery. `None` once the source is closed and drained.
    async fn receive(&self) -> Option<Box<dyn Delivery>>;
}
