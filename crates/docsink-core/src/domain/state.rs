//! Delivery state machine (per message, as seen by the handler).

use serde::{Deserialize, Serialize};

/// DeliveryState は 1 件の配送の状態
///
/// 状態遷移:
/// - Received -> Resolving -> Storing -> Stored
/// - Received -> Resolving -> Storing -> Requeued
/// - Received -> Resolving -> Dropped
///
/// Requeued のメッセージは transport 側で再配送され、consumer からは
/// 新しい Received として見える。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Received,
    Resolving,
    Storing,

    /// Stored and finished.
    Stored,

    /// Unparseable or mistyped content, finished without storing.
    Dropped,

    /// Store failed, returned to the queue.
    Requeued,
}

impl DeliveryState {
    /// Is this a terminal state (disposition done)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryState::Stored | DeliveryState::Dropped | DeliveryState::Requeued
        )
    }

    /// Terminal states that acknowledged the message permanently.
    pub fn is_finished(self) -> bool {
        matches!(self, DeliveryState::Stored | DeliveryState::Dropped)
    }

    pub fn can_transition_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, next),
            (Received, Resolving)
                | (Resolving, Storing)
                | (Resolving, Dropped)
                | (Storing, Stored)
                | (Storing, Requeued)
        )
    }
}
