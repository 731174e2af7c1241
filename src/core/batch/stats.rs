//! Per-queue counters

use super::work_item::Settled;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one queue
#[derive(Debug, Default)]
pub struct QueueStats {
    batches_dispatched: AtomicU64,
    handler_invocations: AtomicU64,
    retries: AtomicU64,
    bisections: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    items_cancelled: AtomicU64,
    items_rejected: AtomicU64,
}

/// Point-in-time copy of [`QueueStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub batches_dispatched: u64,
    pub handler_invocations: u64,
    pub retries: u64,
    pub bisections: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_cancelled: u64,
    pub items_rejected: u64,
}

impl QueueStats {
    pub(crate) fn record_batch(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invocation(&self) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bisection(&self) {
        self.bisections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.items_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settled(&self, settled: Settled) {
        let counter = match settled {
            Settled::Succeeded => &self.items_succeeded,
            Settled::Failed => &self.items_failed,
            Settled::Cancelled => &self.items_cancelled,
            Settled::AlreadyResolved => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bisections: self.bisections.load(Ordering::Relaxed),
            items_succeeded: self.items_succeeded.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_cancelled: self.items_cancelled.load(Ordering::Relaxed),
            items_rejected: self.items_rejected.load(Ordering::Relaxed),
        }
    }
}
