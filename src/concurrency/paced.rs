//! Paced-sequential execution for backends with a low requests-per-minute ceiling.

use super::{run_guarded, sleep_until_deadline, ExecutionContext};
use crate::progress::ProgressReporter;
use crate::types::{Job, JobResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Minimum spacing between two events.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    /// Time still to wait at `now` before the next event may happen.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => (last + self.delay).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Record an event at `at`.
    pub fn mark(&mut self, at: Instant) {
        self.last = Some(at);
    }

    /// Claim the next slot and return how long to wait for it.
    ///
    /// The slot is recorded immediately, so concurrent callers holding the
    /// pacer in turn get successive slots.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        let wait = self.remaining(now);
        self.last = Some(now + wait);
        wait
    }
}

/// One job in flight at a time, spaced by a delay after each success.
///
/// The last-success timestamp belongs to the instance, so reusing one instance
/// across batches keeps the spacing across batch boundaries.
#[derive(Debug)]
pub struct PacedSequential {
    pacer: Pacer,
}

impl PacedSequential {
    pub fn new(pacing_delay: Duration) -> Self {
        Self {
            pacer: Pacer::new(pacing_delay),
        }
    }

    pub fn pacing_delay(&self) -> Duration {
        self.pacer.delay()
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.pacer.last()
    }

    pub async fn run<F, Fut>(
        &mut self,
        jobs: Vec<Job>,
        ctx: &ExecutionContext,
        progress: &mut ProgressReporter,
        exec: F,
    ) -> Vec<JobResult>
    where
        F: Fn(Job, CancellationToken) -> Fut,
        Fut: Future<Output = JobResult>,
    {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let wait = self.pacer.remaining(Instant::now());
            if !wait.is_zero() && !ctx.cancel.is_cancelled() {
                info!(
                    job_id = %job.id,
                    delay_ms = wait.as_millis() as u64,
                    "Pacing before next job"
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {}
                    _ = sleep_until_deadline(ctx.deadline) => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            let result = run_guarded(ctx, job, &exec).await;
            if result.succeeded {
                self.pacer.mark(Instant::now());
            } else {
                debug!(job_id = %result.id, "Job failed, no pacing recorded");
            }
            progress.job_finished(&result);
            results.push(result);
        }
        results
    }
}
