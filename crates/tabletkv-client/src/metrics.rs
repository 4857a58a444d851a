//! Client runtime metrics collection.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, Serialize)]
/// Snapshot of client metrics at a point in time.
pub struct MetricsSnapshot {
    /// Number of RPC attempts started (including retries).
    pub rpcs_started: u64,
    /// Number of logical RPCs that succeeded.
    pub rpcs_succeeded: u64,
    /// Number of logical RPCs that failed terminally.
    pub rpcs_failed: u64,
    /// Number of retry attempts scheduled.
    pub retries_total: u64,
    /// Number of mutations adapted and handed to the dispatcher.
    pub mutations_submitted: u64,
    /// Number of mutations that failed asynchronously.
    pub mutations_failed: u64,
}

/// Thread-safe client metrics collector.
pub struct ClientMetrics {
    rpcs_started: AtomicU64,
    rpcs_succeeded: AtomicU64,
    rpcs_failed: AtomicU64,
    retries_total: AtomicU64,
    mutations_submitted: AtomicU64,
    mutations_failed: AtomicU64,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ClientMetrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rpcs_started: AtomicU64::new(0),
            rpcs_succeeded: AtomicU64::new(0),
            rpcs_failed: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            mutations_submitted: AtomicU64::new(0),
            mutations_failed: AtomicU64::new(0),
        }
    }

    /// Counts one RPC attempt.
    pub fn inc_rpcs_started(&self) {
        self.rpcs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one successful logical RPC.
    pub fn inc_rpcs_succeeded(&self) {
        self.rpcs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one terminally failed logical RPC.
    pub fn inc_rpcs_failed(&self) {
        self.rpcs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one scheduled retry.
    pub fn inc_retries(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one mutation accepted by a buffered mutator.
    pub fn inc_mutations_submitted(&self) {
        self.mutations_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one asynchronously failed mutation.
    pub fn inc_mutations_failed(&self) {
        self.mutations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rpcs_started: self.rpcs_started.load(Ordering::Relaxed),
            rpcs_succeeded: self.rpcs_succeeded.load(Ordering::Relaxed),
            rpcs_failed: self.rpcs_failed.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            mutations_submitted: self.mutations_submitted.load(Ordering::Relaxed),
            mutations_failed: self.mutations_failed.load(Ordering::Relaxed),
        }
    }
}
