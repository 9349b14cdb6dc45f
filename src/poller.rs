//! Async Job Poller
//!
//! Drives an asynchronous backend job to a terminal state: a bounded synchronous
//! attempt first, then fixed-interval polling under an overall deadline.

use crate::backend::{AsyncBackend, PollStatus, SubmitOutcome};
use crate::error::{BackendError, ErrorClass};
use crate::types::{ArtifactRef, AsyncJobHandle, Job, PollState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Head start the backend's "still running" answer gets over the client bound.
pub const SYNC_WAIT_GRACE: Duration = Duration::from_secs(5);

const MIN_SERVER_WAIT: Duration = Duration::from_secs(1);

/// Poller timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Bound on the synchronous attempt
    pub sync_timeout: Duration,
    /// Fixed delay between polls
    pub poll_interval: Duration,
    /// Overall deadline for the polling phase
    pub poll_deadline: Duration,
    /// Consecutive retryable poll errors tolerated before giving up
    pub max_poll_errors: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(300),
            max_poll_errors: 3,
        }
    }
}

impl PollerConfig {
    /// Wait requested from the backend on the synchronous attempt.
    ///
    /// Kept below `sync_timeout` so a pending handle comes back before the
    /// client-side timeout fires and forces a second submission.
    pub fn server_wait(&self) -> Duration {
        self.sync_timeout
            .saturating_sub(SYNC_WAIT_GRACE)
            .max(MIN_SERVER_WAIT)
            .min(self.sync_timeout)
    }
}

/// Last observed state of one remote job. Never moves backwards.
#[derive(Debug)]
struct PollTracker {
    handle: AsyncJobHandle,
    state: Option<PollState>,
    polls: u32,
}

impl PollTracker {
    fn new(handle: AsyncJobHandle) -> Self {
        Self {
            handle,
            state: None,
            polls: 0,
        }
    }

    /// Apply an observed state; regressions keep the current state.
    fn observe(&mut self, next: PollState) -> PollState {
        self.polls += 1;
        match self.state {
            None => {
                self.state = Some(next);
                next
            }
            Some(current) if current == next => current,
            Some(current) if current.can_transition_to(next) => {
                debug!(
                    remote_id = %self.handle.remote_id,
                    from = %current,
                    to = %next,
                    "Remote job state changed"
                );
                self.state = Some(next);
                next
            }
            Some(current) => {
                warn!(
                    remote_id = %self.handle.remote_id,
                    current = %current,
                    reported = %next,
                    "Ignoring regressive state transition"
                );
                current
            }
        }
    }
}

pub struct AsyncJobPoller {
    config: PollerConfig,
}

impl Default for AsyncJobPoller {
    fn default() -> Self {
        Self::new(PollerConfig::default())
    }
}

impl AsyncJobPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run `job` to completion on `backend`.
    ///
    /// An explicit error from the synchronous attempt is returned as-is. Only a
    /// client-side timeout of that attempt triggers a fresh submission.
    pub async fn run(
        &self,
        backend: &dyn AsyncBackend,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<ArtifactRef, BackendError> {
        let sync_attempt = tokio::time::timeout(
            self.config.sync_timeout,
            backend.submit_and_wait(job, self.config.server_wait()),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BackendError::Cancelled(format!("job '{}' cancelled", job.id)));
            }
            outcome = sync_attempt => outcome,
        };

        let handle = match outcome {
            Ok(Ok(SubmitOutcome::Completed(artifact))) => {
                debug!(job_id = %job.id, "Completed on synchronous path");
                return Ok(artifact);
            }
            Ok(Ok(SubmitOutcome::Pending(handle))) => {
                info!(
                    job_id = %job.id,
                    remote_id = %handle.remote_id,
                    "Still running after synchronous wait, polling"
                );
                handle
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                info!(
                    job_id = %job.id,
                    timeout_secs = self.config.sync_timeout.as_secs(),
                    "Synchronous attempt timed out, resubmitting for polling"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(BackendError::Cancelled(format!("job '{}' cancelled", job.id)));
                    }
                    handle = backend.submit(job) => handle?,
                }
            }
        };

        self.poll_until_terminal(backend, handle, cancel).await
    }

    /// Poll `handle` until the remote job is terminal, the deadline passes, or
    /// `cancel` fires. The handle is consumed.
    pub async fn poll_until_terminal(
        &self,
        backend: &dyn AsyncBackend,
        handle: AsyncJobHandle,
        cancel: &CancellationToken,
    ) -> Result<ArtifactRef, BackendError> {
        let deadline = Instant::now() + self.config.poll_deadline;
        let mut tracker = PollTracker::new(handle);
        let mut consecutive_errors = 0u32;

        loop {
            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(&tracker)),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(&tracker)),
                status = backend.poll(&tracker.handle) => status,
            };

            match observed {
                Ok(status) => {
                    consecutive_errors = 0;
                    if let Some(result) = self.settle(&mut tracker, status) {
                        return result;
                    }
                }
                Err(err) if is_tolerable_poll_error(&err) => {
                    consecutive_errors += 1;
                    warn!(
                        remote_id = %tracker.handle.remote_id,
                        consecutive_errors,
                        error = %err,
                        "Poll request failed"
                    );
                    if consecutive_errors >= self.config.max_poll_errors {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(&tracker)),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(&tracker)),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    fn settle(
        &self,
        tracker: &mut PollTracker,
        status: PollStatus,
    ) -> Option<Result<ArtifactRef, BackendError>> {
        let state = tracker.observe(status.state);
        let remote_id = &tracker.handle.remote_id;
        match state {
            PollState::Queued | PollState::Running => None,
            PollState::Completed => {
                info!(remote_id = %remote_id, polls = tracker.polls, "Remote job completed");
                Some(status.artifact.ok_or_else(|| {
                    BackendError::Unknown(format!(
                        "Remote job {} completed without an artifact",
                        remote_id
                    ))
                }))
            }
            PollState::Failed => Some(Err(BackendError::Unrecoverable(format!(
                "Remote job {} failed: {}",
                remote_id,
                status.error.as_deref().unwrap_or("no error detail")
            )))),
            PollState::Cancelled => Some(Err(BackendError::Unrecoverable(format!(
                "Remote job {} was cancelled",
                remote_id
            )))),
            PollState::TimedOut => Some(Err(BackendError::Timeout(self.config.poll_deadline))),
        }
    }

    fn timed_out(&self, tracker: &PollTracker) -> BackendError {
        warn!(
            remote_id = %tracker.handle.remote_id,
            polls = tracker.polls,
            deadline_secs = self.config.poll_deadline.as_secs(),
            "Polling deadline elapsed"
        );
        BackendError::Timeout(self.config.poll_deadline)
    }

    fn cancelled(&self, tracker: &PollTracker) -> BackendError {
        info!(remote_id = %tracker.handle.remote_id, "Polling cancelled");
        BackendError::Cancelled(format!("remote job {} abandoned", tracker.handle.remote_id))
    }
}

fn is_tolerable_poll_error(err: &BackendError) -> bool {
    matches!(
        err.class(),
        ErrorClass::Transient | ErrorClass::RateLimited | ErrorClass::Unknown
    )
}
