//! Outcome model: what happened to one delivery, and how it is disposed.
//!
//! The handler turns every delivery into exactly one `HandleOutcome`, and
//! every outcome maps to exactly one `Disposition`. Keeping the mapping in
//! one `match` makes the "finish or requeue, exactly once" rule checkable
//! by reading a single function.

use std::time::Duration;

use super::errors::{HandleError, KeyError};
use super::key::{DocKey, ResolvedKey};
use super::state::DeliveryState;
use crate::ports::StoreError;

/// Terminal disposition of a delivery on the queue transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Permanent acknowledgment. The message is never delivered again.
    Finish,

    /// Return the message to the queue for redelivery after `delay`.
    Requeue { delay: Duration },
}

impl Disposition {
    /// Requeue with an immediate redelivery hint.
    pub const REQUEUE_NOW: Disposition = Disposition::Requeue {
        delay: Duration::ZERO,
    };

    pub fn is_finish(&self) -> bool {
        matches!(self, Disposition::Finish)
    }
}

/// Result of resolving and storing one message.
#[derive(Debug)]
pub enum HandleOutcome {
    /// Body stored under the resolved key.
    Stored(ResolvedKey),

    /// Key could not be resolved from the content (poison message).
    Dropped(KeyError),

    /// Key resolved but the store rejected the insert (conflict included).
    StoreFailed { key: DocKey, error: StoreError },
}

impl HandleOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            HandleOutcome::Stored(_) => Disposition::Finish,
            HandleOutcome::Dropped(_) => Disposition::Finish,
            HandleOutcome::StoreFailed { .. } => Disposition::REQUEUE_NOW,
        }
    }

    pub fn final_state(&self) -> DeliveryState {
        match self {
            HandleOutcome::Stored(_) => DeliveryState::Stored,
            HandleOutcome::Dropped(_) => DeliveryState::Dropped,
            HandleOutcome::StoreFailed { .. } => DeliveryState::Requeued,
        }
    }

    pub fn into_result(self) -> Result<ResolvedKey, HandleError> {
        match self {
            HandleOutcome::Stored(resolved) => Ok(resolved),
            HandleOutcome::Dropped(err) => Err(HandleError::Dropped(err)),
            HandleOutcome::StoreFailed { key, error } => {
                Err(HandleError::StoreFailed { key, source: error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KeyOrigin;

    #[test]
    fn stored_and_dropped_finish() {
        let stored = HandleOutcome::Stored(ResolvedKey::new(DocKey::new("a"), KeyOrigin::Generated));
        assert_eq!(stored.disposition(), Disposition::Finish);

        let dropped = HandleOutcome::Dropped(KeyError::Parse("eof".into()));
        assert_eq!(dropped.disposition(), Disposition::Finish);
        assert_eq!(dropped.final_state(), DeliveryState::Dropped);
    }

    #[test]
    fn store_failure_requeues_immediately() {
        let failed = HandleOutcome::StoreFailed {
            key: DocKey::new("a"),
            error: StoreError::AlreadyExists(DocKey::new("a")),
        };
        assert_eq!(
            failed.disposition(),
            Disposition::Requeue {
                delay: Duration::ZERO
            }
        );
        assert_eq!(failed.final_state(), DeliveryState::Requeued);
        assert!(matches!(
            failed.into_result(),
            Err(HandleError::StoreFailed { .. })
        ));
    }
}
