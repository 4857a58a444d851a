//! Admission control for buffered writes.
//!
//! The controller bounds the number of in-flight operations and their
//! estimated aggregate size. [`AdmissionController::admit`] blocks the calling
//! thread until capacity frees up; this is the backpressure point of the write
//! path. A controller with nothing outstanding admits any single operation, no
//! matter how large, so an oversized write can always make progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Limits enforced by an [`AdmissionController`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum estimated bytes in flight (default: 16 MiB).
    pub max_memory_bytes: u64,
    /// Maximum number of operations in flight (default: 50).
    pub max_inflight_operations: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 16 * 1024 * 1024,
            max_inflight_operations: 50,
        }
    }
}

/// Proof of admission for one operation.
///
/// Hand it back to [`AdmissionController::complete`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionToken {
    id: u64,
    size: u64,
}

impl AdmissionToken {
    /// Identifier unique within the issuing controller.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Estimated size recorded at admission.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    /// Operations currently admitted and not completed.
    pub inflight_operations: usize,
    /// Estimated bytes currently admitted and not completed.
    pub inflight_bytes: u64,
    /// Operations admitted over the controller's lifetime.
    pub admitted_total: u64,
    /// Admissions that had to wait for capacity.
    pub blocked_total: u64,
}

#[derive(Default)]
struct AdmissionState {
    current_bytes: u64,
    current_count: usize,
    outstanding: HashMap<u64, u64>,
    admitted_total: u64,
    blocked_total: u64,
}

impl AdmissionState {
    fn is_empty(&self) -> bool {
        self.current_count == 0 && self.current_bytes == 0
    }

    fn has_capacity(&self, config: &AdmissionConfig, size: u64) -> bool {
        if self.is_empty() {
            return true;
        }
        self.current_bytes.saturating_add(size) <= config.max_memory_bytes
            && self.current_count < config.max_inflight_operations
    }
}

/// Bounds in-flight operations by count and estimated bytes.
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<AdmissionState>,
    changed: Condvar,
    next_id: AtomicU64,
}

impl AdmissionController {
    /// Creates a controller enforcing `config`.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AdmissionState::default()),
            changed: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The enforced limits.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    fn grant(&self, state: &mut AdmissionState, size: u64) -> AdmissionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.current_bytes = state.current_bytes.saturating_add(size);
        state.current_count += 1;
        state.admitted_total += 1;
        state.outstanding.insert(id, size);
        AdmissionToken { id, size }
    }

    /// Admits an operation of `size` estimated bytes, blocking the calling
    /// thread for as long as the limits are exceeded.
    pub fn admit(&self, size: u64) -> AdmissionToken {
        let mut state = self.state.lock();
        if !state.has_capacity(&self.config, size) {
            state.blocked_total += 1;
            debug!(
                size,
                inflight = state.current_count,
                inflight_bytes = state.current_bytes,
                "Admission blocked"
            );
            while !state.has_capacity(&self.config, size) {
                self.changed.wait(&mut state);
            }
        }
        self.grant(&mut state, size)
    }

    /// Like [`admit`](Self::admit), but gives up after `timeout`.
    pub fn admit_timeout(&self, size: u64, timeout: Duration) -> Result<AdmissionToken> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = self.state.lock();
        if !state.has_capacity(&self.config, size) {
            state.blocked_total += 1;
            while !state.has_capacity(&self.config, size) {
                if self.changed.wait_until(&mut state, deadline).timed_out()
                    && !state.has_capacity(&self.config, size)
                {
                    return Err(ClientError::AdmissionTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }
        Ok(self.grant(&mut state, size))
    }

    /// Admits only if capacity is available right now.
    pub fn try_admit(&self, size: u64) -> Option<AdmissionToken> {
        let mut state = self.state.lock();
        if state.has_capacity(&self.config, size) {
            Some(self.grant(&mut state, size))
        } else {
            None
        }
    }

    /// Releases the capacity held by `token`.
    ///
    /// Returns `false`, leaving the counters untouched, if the token was
    /// already completed.
    pub fn complete(&self, token: &AdmissionToken) -> bool {
        let mut state = self.state.lock();
        match state.outstanding.remove(&token.id) {
            Some(size) => {
                state.current_bytes = state.current_bytes.saturating_sub(size);
                state.current_count = state.current_count.saturating_sub(1);
                drop(state);
                self.changed.notify_all();
                true
            }
            None => {
                warn!(
                    token = token.id,
                    size = token.size,
                    "Admission token completed twice"
                );
                false
            }
        }
    }

    /// Blocks until no operation is in flight.
    pub fn await_drained(&self) {
        let mut state = self.state.lock();
        while state.current_count > 0 {
            self.changed.wait(&mut state);
        }
    }

    /// Blocks until no operation is in flight or `timeout` passes.
    ///
    /// Returns `true` if the controller drained.
    pub fn await_drained_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.current_count > 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.current_count == 0;
            }
        }
        true
    }

    /// Number of operations admitted and not completed.
    pub fn inflight_count(&self) -> usize {
        self.state.lock().current_count
    }

    /// Estimated bytes admitted and not completed.
    pub fn inflight_bytes(&self) -> u64 {
        self.state.lock().current_bytes
    }

    /// Whether any operation is in flight.
    pub fn has_inflight(&self) -> bool {
        self.inflight_count() > 0
    }

    /// Returns a point-in-time snapshot.
    pub fn stats(&self) -> AdmissionStats {
        let state = self.state.lock();
        AdmissionStats {
            inflight_operations: state.current_count,
            inflight_bytes: state.current_bytes,
            admitted_total: state.admitted_total,
            blocked_total: state.blocked_total,
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
