//! Buffered, asynchronous row mutations with deferred error reporting.
//!
//! [`BufferedMutator::mutate`] hands each write to the [`AsyncDispatcher`] and
//! returns. Failures are recorded by the completion callback and reported to
//! the [`ExceptionListener`] at the next synchronous checkpoint: the next
//! `mutate`, a `flush` or `close`. Nothing is ever raised from the callback
//! itself.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::{RequestAdapter, RowMutation};
use crate::admission::AdmissionStats;
use crate::dispatcher::AsyncDispatcher;
use crate::error::{ClientError, Result};
use crate::metrics::ClientMetrics;

/// A mutation that failed, with the reason.
#[derive(Debug)]
pub struct FailedMutation {
    /// The mutation as passed to [`BufferedMutator::mutate`].
    pub mutation: RowMutation,
    /// Why it failed.
    pub cause: ClientError,
}

/// Every mutation that failed since the previous report.
#[derive(Debug, Error)]
#[error("{} mutation(s) failed", .failures.len())]
pub struct MutationFailures {
    failures: Vec<FailedMutation>,
}

impl MutationFailures {
    /// Wraps a batch of failures.
    pub fn new(failures: Vec<FailedMutation>) -> Self {
        Self { failures }
    }

    /// The failures, oldest first.
    pub fn failures(&self) -> &[FailedMutation] {
        &self.failures
    }

    /// Number of failed mutations.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Consumes the batch.
    pub fn into_inner(self) -> Vec<FailedMutation> {
        self.failures
    }
}

/// Receives failures reported by a [`BufferedMutator`].
pub trait ExceptionListener: Send + Sync {
    /// Called with every failure since the last report. Returning an error
    /// makes the triggering call (`mutate`, `flush` or `close`) fail with it.
    fn on_exception(&self, failures: MutationFailures, mutator: &BufferedMutator) -> Result<()>;
}

/// Listener that turns reported failures into [`ClientError::MutationsFailed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RaisingListener;

impl ExceptionListener for RaisingListener {
    fn on_exception(&self, failures: MutationFailures, _mutator: &BufferedMutator) -> Result<()> {
        Err(ClientError::MutationsFailed(failures))
    }
}

/// Point-in-time view of a mutator.
#[derive(Debug, Clone, Serialize)]
pub struct MutatorStats {
    /// Mutations whose completion callback has not run yet.
    pub inflight_callbacks: usize,
    /// Failures recorded but not yet reported.
    pub pending_failures: usize,
    /// Admission controller of the mutator.
    pub admission: AdmissionStats,
    /// Whether the mutator was closed.
    pub closed: bool,
}

#[derive(Default)]
struct MutatorState {
    inflight: HashSet<u64>,
    failures: Vec<FailedMutation>,
    closed: bool,
}

#[derive(Default)]
struct SharedState {
    state: Mutex<MutatorState>,
    idle: Condvar,
}

impl SharedState {
    /// Registers `id` as in flight unless the mutator is closed.
    fn register(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::Closed);
        }
        state.inflight.insert(id);
        Ok(())
    }

    fn finish(&self, id: u64, failure: Option<FailedMutation>) {
        let mut state = self.state.lock();
        state.inflight.remove(&id);
        if let Some(failure) = failure {
            state.failures.push(failure);
        }
        if state.inflight.is_empty() {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.inflight.is_empty() {
            self.idle.wait(&mut state);
        }
    }
}

/// Buffers writes to one table and sends them in the background.
pub struct BufferedMutator {
    table_name: String,
    adapter: Arc<dyn RequestAdapter>,
    dispatcher: AsyncDispatcher,
    listener: Arc<dyn ExceptionListener>,
    metrics: Arc<ClientMetrics>,
    shared: Arc<SharedState>,
    next_id: AtomicU64,
}

impl BufferedMutator {
    /// Creates a mutator writing to `table_name` through `dispatcher`.
    pub fn new(
        table_name: impl Into<String>,
        adapter: Arc<dyn RequestAdapter>,
        dispatcher: AsyncDispatcher,
        listener: Arc<dyn ExceptionListener>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            adapter,
            dispatcher,
            listener,
            metrics,
            shared: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Fully qualified name of the target table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Sends one mutation in the background.
    ///
    /// Failures of earlier mutations are reported to the listener first. May
    /// block while the admission limits are exceeded.
    pub fn mutate(&self, mutation: impl Into<RowMutation>) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.handle_exceptions()?;

        // From here on `close` waits for this mutation, or it already won and
        // the mutation is refused.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.register(id)?;

        let mutation = mutation.into();
        let request = match self.adapter.adapt(&self.table_name, &mutation) {
            Ok(request) => request,
            Err(cause) => {
                debug!(table = %self.table_name, error = %cause, "Mutation rejected by adapter");
                self.metrics.inc_mutations_failed();
                self.shared.finish(id, Some(FailedMutation { mutation, cause }));
                return Ok(());
            }
        };

        let shared = Arc::clone(&self.shared);
        let metrics = Arc::clone(&self.metrics);
        let submitted = self.dispatcher.submit_mutate_row_with(request, move |result| {
            let failure = result.err().map(|cause| {
                metrics.inc_mutations_failed();
                FailedMutation { mutation, cause }
            });
            shared.finish(id, failure);
        });
        if let Err(error) = submitted {
            self.shared.finish(id, None);
            return Err(error);
        }
        self.metrics.inc_mutations_submitted();
        Ok(())
    }

    /// Sends every mutation of `mutations`, stopping at the first error.
    pub fn mutate_all<I>(&self, mutations: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<RowMutation>,
    {
        for mutation in mutations {
            self.mutate(mutation)?;
        }
        Ok(())
    }

    /// Whether some accepted mutation has not completed yet.
    pub fn has_inflight_requests(&self) -> bool {
        let callbacks_pending = !self.shared.state.lock().inflight.is_empty();
        self.dispatcher.admission().has_inflight() || callbacks_pending
    }

    /// Waits for every accepted mutation, then reports failures.
    ///
    /// Blocks the calling thread; do not call it from a thread that drives the
    /// I/O runtime.
    pub fn flush(&self) -> Result<()> {
        self.wait_for_completion();
        self.handle_exceptions()
    }

    /// Stops accepting mutations, waits for the accepted ones, reports any
    /// remaining failures and releases an owned worker pool.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }
        self.wait_for_completion();
        let reported = self.handle_exceptions();
        self.dispatcher.shutdown();
        info!(table = %self.table_name, "Buffered mutator closed");
        reported
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Returns a point-in-time snapshot.
    pub fn stats(&self) -> MutatorStats {
        let (inflight_callbacks, pending_failures, closed) = {
            let state = self.shared.state.lock();
            (state.inflight.len(), state.failures.len(), state.closed)
        };
        MutatorStats {
            inflight_callbacks,
            pending_failures,
            admission: self.dispatcher.admission().stats(),
            closed,
        }
    }

    fn wait_for_completion(&self) {
        self.dispatcher.await_drained();
        self.shared.wait_idle();
    }

    fn handle_exceptions(&self) -> Result<()> {
        let failures = std::mem::take(&mut self.shared.state.lock().failures);
        if failures.is_empty() {
            return Ok(());
        }
        warn!(
            table = %self.table_name,
            failed = failures.len(),
            "Reporting failed mutations"
        );
        self.listener
            .on_exception(MutationFailures::new(failures), self)
    }
}

impl fmt::Debug for BufferedMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedMutator")
            .field("table_name", &self.table_name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
