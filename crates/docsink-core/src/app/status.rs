use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{HandleError, ResolvedKey};

/// Snapshot of delivery results, by disposition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub stored: u64,
    pub dropped: u64,
    pub requeued: u64,
    pub transport_failures: u64,
}

impl DeliveryCounts {
    pub fn handled(&self) -> u64 {
        self.stored + self.dropped + self.requeued + self.transport_failures
    }
}

/// Shared counters updated by every handler task.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    stored: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
    transport_failures: AtomicU64,
}

impl DeliveryStats {
    pub fn record(&self, result: &Result<ResolvedKey, HandleError>) {
        let counter = match result {
            Ok(_) => &self.stored,
            Err(HandleError::Dropped(_)) => &self.dropped,
            Err(HandleError::StoreFailed { .. }) => &self.requeued,
            Err(HandleError::Transport(_)) => &self.transport_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryCounts {
        DeliveryCounts {
            stored: self.stored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}
