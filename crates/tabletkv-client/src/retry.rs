//! Retry logic with exponential backoff for idempotent RPCs.
//!
//! [`RetryingCall`] wraps one logical RPC. Each attempt picks a fresh channel
//! from the pool; transient failures of requests that the retry predicate
//! accepts are retried after `initial_backoff * multiplier^attempt`, bounded by
//! the attempt budget and by the elapsed time measured through an injectable
//! [`Clock`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::idempotency::RetryPredicate;
use crate::metrics::ClientMetrics;
use crate::pool::ChannelPool;
use crate::protocol::{StatusCode, UnaryMethod};
use crate::transport::CallOptions;

/// Source of monotonic time for retry budgeting.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn nano_time(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn nano_time(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Whether transient failures are retried at all (default: true).
    pub enable_retries: bool,
    /// Whether `DEADLINE_EXCEEDED` counts as transient (default: true).
    pub retry_on_deadline_exceeded: bool,
    /// Delay before the first retry (default: 5ms).
    pub initial_backoff_ms: u64,
    /// Multiplier applied per attempt (default: 2.0).
    pub backoff_multiplier: f64,
    /// Upper bound of a single delay (default: 10 seconds).
    pub max_backoff_ms: u64,
    /// Total attempts including the first one (default: 25).
    pub max_attempts: u32,
    /// Total time budget for retrying (default: 60 seconds).
    pub max_elapsed_backoff_ms: u64,
    /// Status codes treated as transient (default: INTERNAL, UNAVAILABLE, ABORTED).
    pub retry_codes: Vec<StatusCode>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enable_retries: true,
            retry_on_deadline_exceeded: true,
            initial_backoff_ms: 5,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            max_attempts: 25,
            max_elapsed_backoff_ms: 60_000,
            retry_codes: vec![
                StatusCode::Internal,
                StatusCode::Unavailable,
                StatusCode::Aborted,
            ],
        }
    }
}

impl RetryOptions {
    /// Returns true if a failure with `code` may be retried.
    pub fn is_retryable_code(&self, code: StatusCode) -> bool {
        if !self.enable_retries {
            return false;
        }
        if code == StatusCode::DeadlineExceeded {
            return self.retry_on_deadline_exceeded;
        }
        self.retry_codes.contains(&code)
    }

    /// Computes the delay before retry number `attempt` (zero based):
    /// `initial_backoff * backoff_multiplier^attempt`, capped at `max_backoff`.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_backoff_ms as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let computed = base_delay_ms * self.backoff_multiplier.powi(exponent);
        let capped = computed.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Checks that the options describe a usable schedule.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ClientError::InvalidConfig {
                reason: format!(
                    "backoff_multiplier must be >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        if self.max_attempts == 0 {
            return Err(ClientError::InvalidConfig {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Checks if an error is transient under the given options.
///
/// Status errors are classified by code. Local I/O errors raised by a channel
/// mid-call are transient. Everything else (configuration, interceptor,
/// invalid request, unexpected response) is permanent.
pub fn is_transient(error: &ClientError, options: &RetryOptions) -> bool {
    match error {
        ClientError::Status { code, .. } => options.is_retryable_code(*code),
        ClientError::Io(_) => options.enable_retries,
        _ => false,
    }
}

/// Retry options together with the clock used to measure the time budget.
#[derive(Clone)]
pub struct RetryPolicy {
    options: RetryOptions,
    clock: Arc<dyn Clock>,
}

impl RetryPolicy {
    /// Creates a policy measured with the system clock.
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The retry options.
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// The clock used for the elapsed-time budget.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One logical RPC with its retry loop.
pub struct RetryingCall<Req: UnaryMethod> {
    pool: Arc<ChannelPool>,
    call_options: CallOptions,
    request: Req,
    retryable: bool,
    policy: RetryPolicy,
    metrics: Arc<ClientMetrics>,
}

impl<Req: UnaryMethod> RetryingCall<Req> {
    /// Creates the call. The predicate is evaluated once, up front.
    pub fn new(
        pool: Arc<ChannelPool>,
        call_options: CallOptions,
        request: Req,
        predicate: RetryPredicate<Req>,
        policy: RetryPolicy,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let retryable = predicate(Some(&request));
        Self {
            pool,
            call_options,
            request,
            retryable,
            policy,
            metrics,
        }
    }

    /// Whether the request may be resent after a transient failure.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The wrapped request.
    pub fn request(&self) -> &Req {
        &self.request
    }

    /// Runs attempts until one succeeds or the failure is terminal.
    ///
    /// The terminal error is returned unchanged.
    pub async fn run(self) -> Result<Req::Response> {
        let options = self.policy.options();
        let clock = self.policy.clock();
        let method = Req::method();
        let started = clock.nano_time();
        let max_elapsed = Duration::from_millis(options.max_elapsed_backoff_ms);
        let mut attempt: u32 = 0;

        loop {
            let call = self.pool.new_call(method, self.call_options.clone());
            self.metrics.inc_rpcs_started();
            let error = match call
                .start(self.request.clone().into_rpc())
                .await
                .and_then(Req::from_rpc)
            {
                Ok(response) => {
                    self.metrics.inc_rpcs_succeeded();
                    return Ok(response);
                }
                Err(error) => error,
            };
            attempt += 1;

            if !self.retryable || !is_transient(&error, options) {
                self.metrics.inc_rpcs_failed();
                return Err(error);
            }
            if attempt >= options.max_attempts {
                warn!(
                    method = method.full_name,
                    attempts = attempt,
                    error = %error,
                    "Retry attempts exhausted"
                );
                self.metrics.inc_rpcs_failed();
                return Err(error);
            }

            let backoff = options.compute_backoff(attempt - 1);
            let elapsed = Duration::from_nanos(clock.nano_time().saturating_sub(started));
            if elapsed + backoff > max_elapsed {
                warn!(
                    method = method.full_name,
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "Retry time budget exhausted"
                );
                self.metrics.inc_rpcs_failed();
                return Err(error);
            }

            self.metrics.inc_retries();
            debug!(
                method = method.full_name,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Retrying call"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
