//! Node-level performance counters exposed to the operator shell.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared between all workers of a node.
///
/// Errors absorbed inside the mesh engine surface here rather than as
/// exceptions; the operator shell polls [`PerformanceStats::snapshot`].
#[derive(Debug, Default)]
pub struct PerformanceStats {
    transaction_count: AtomicU64,
    error_count: AtomicU64,
    sync_count: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub transaction_count: u64,
    pub error_count: u64,
    pub sync_count: u64,
}

impl PerformanceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transaction(&self) {
        self.transaction_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync(&self) {
        self.sync_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            transaction_count: self.transaction_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            sync_count: self.sync_count.load(Ordering::Relaxed),
        }
    }
}
