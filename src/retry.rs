//! Retry Policy
//!
//! Pure retry decisions for backend calls plus the async driver that applies them.
//! The policy never holds state between calls; the attempt count and the last
//! rate-limit delay live in a [`RetryState`] owned by the driving loop.

use crate::concurrency::cancellable_sleep;
use crate::error::{BackendError, ErrorClass};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

/// Caller-owned retry bookkeeping for one unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far (1 after the first attempt).
    pub attempt: u32,
    /// Delay chosen for the previous rate-limited retry, if any.
    pub last_rate_limit_delay: Option<Duration>,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one
    pub max_attempts: u32,
    /// Exponential backoff base in seconds (`base^attempt`)
    pub backoff_base: f64,
    /// Upper bound on exponential backoff
    pub max_backoff: Duration,
    /// Added on top of a backend's wait hint
    pub rate_limit_buffer: Duration,
    /// Used when a throttled response carries no wait hint
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            rate_limit_buffer: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Decide what to do after `state.attempt` attempts ended with `error`.
    pub fn decide(&self, state: &RetryState, error: &BackendError) -> RetryDecision {
        match error.class() {
            ErrorClass::Validation | ErrorClass::Unrecoverable => RetryDecision::Stop,
            _ if state.attempt >= self.max_attempts => RetryDecision::Stop,
            ErrorClass::RateLimited => {
                let hinted = error
                    .retry_after()
                    .unwrap_or(self.default_retry_after)
                    .saturating_add(self.rate_limit_buffer);
                let delay = match state.last_rate_limit_delay {
                    Some(previous) => previous.max(hinted),
                    None => hinted,
                };
                RetryDecision::RetryAfter(delay)
            }
            ErrorClass::Transient | ErrorClass::Timeout | ErrorClass::Unknown => {
                RetryDecision::RetryAfter(self.backoff_delay(state.attempt))
            }
        }
    }

    /// Exponential backoff for the given attempt count, capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.max(0.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure after the policy stopped retrying.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last_error: BackendError,
}

impl std::fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.last_error, self.attempts)
    }
}

/// Run `op` until it succeeds or `policy` says stop.
///
/// `op` receives the 1-based attempt number. Waits between attempts observe
/// `cancel`; a cancelled wait ends the loop with [`BackendError::Cancelled`].
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<Attempted<T>, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut state = RetryState::default();
    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure {
                attempts: state.attempt,
                last_error: BackendError::Cancelled(format!("{} cancelled", label)),
            });
        }

        state.attempt += 1;
        debug!(label, attempt = state.attempt, "Starting attempt");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(BackendError::Cancelled(format!("{} cancelled during attempt", label)))
            }
            result = op(state.attempt) => result,
        };

        let error = match result {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: state.attempt,
                })
            }
            Err(error) => error,
        };

        match policy.decide(&state, &error) {
            RetryDecision::Stop => {
                warn!(
                    label,
                    attempt = state.attempt,
                    error = %error,
                    "Giving up"
                );
                return Err(RetryFailure {
                    attempts: state.attempt,
                    last_error: error,
                });
            }
            RetryDecision::RetryAfter(delay) => {
                if error.class() == ErrorClass::RateLimited {
                    state.last_rate_limit_delay = Some(delay);
                }
                info!(
                    label,
                    attempt = state.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after backoff"
                );
                if !cancellable_sleep(delay, cancel).await {
                    return Err(RetryFailure {
                        attempts: state.attempt,
                        last_error: BackendError::Cancelled(format!(
                            "{} cancelled while waiting to retry",
                            label
                        )),
                    });
                }
            }
        }
    }
}
