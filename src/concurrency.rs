//! Concurrency Strategies
//!
//! How a batch's jobs are scheduled against one backend: strictly paced one at a
//! time, or in fixed-size waves. Both strategies return exactly one result per job
//! and never let one job's failure stop the others.

pub mod paced;
pub mod pooled;

pub use paced::{Pacer, PacedSequential};
pub use pooled::PooledParallel;

use crate::progress::ProgressReporter;
use crate::types::{BackendKind, Job, JobResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default pacing between successful jobs on a paced backend.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_secs(6);
/// Default wave width on a pooled backend.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Configured scheduling discipline for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPolicy {
    PacedSequential,
    PooledParallel,
}

impl StrategyPolicy {
    /// Discipline each backend family runs under unless configured otherwise.
    pub fn default_for(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Gemini => StrategyPolicy::PacedSequential,
            BackendKind::Replicate => StrategyPolicy::PooledParallel,
        }
    }
}

/// Batch-wide cancellation and deadline shared by every job of one run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Scheduling strategy instance for one backend.
#[derive(Debug)]
pub enum ConcurrencyStrategy {
    PacedSequential(PacedSequential),
    PooledParallel(PooledParallel),
}

impl ConcurrencyStrategy {
    pub fn from_policy(policy: StrategyPolicy, pacing_delay: Duration, max_concurrency: usize) -> Self {
        match policy {
            StrategyPolicy::PacedSequential => {
                ConcurrencyStrategy::PacedSequential(PacedSequential::new(pacing_delay))
            }
            StrategyPolicy::PooledParallel => {
                ConcurrencyStrategy::PooledParallel(PooledParallel::new(max_concurrency))
            }
        }
    }

    pub fn policy(&self) -> StrategyPolicy {
        match self {
            ConcurrencyStrategy::PacedSequential(_) => StrategyPolicy::PacedSequential,
            ConcurrencyStrategy::PooledParallel(_) => StrategyPolicy::PooledParallel,
        }
    }

    /// Human-readable summary, e.g. `paced (6000 ms)`.
    pub fn describe(&self) -> String {
        match self {
            ConcurrencyStrategy::PacedSequential(paced) => {
                format!("paced-sequential ({} ms)", paced.pacing_delay().as_millis())
            }
            ConcurrencyStrategy::PooledParallel(pooled) => {
                format!("pooled-parallel (x{})", pooled.max_concurrency())
            }
        }
    }

    /// Run every job through `exec`, returning one result per job.
    ///
    /// Results are in completion order; callers re-associate them by id.
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
        match self {
            ConcurrencyStrategy::PacedSequential(paced) => paced.run(jobs, ctx, progress, exec).await,
            ConcurrencyStrategy::PooledParallel(pooled) => pooled.run(jobs, ctx, progress, exec).await,
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns false when cancelled.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Run one job under the batch's cancellation and deadline.
///
/// A job that has not started when the batch is cancelled or past its deadline is
/// recorded as failed without calling `exec`. A job still in flight at the deadline
/// has its own token cancelled and is awaited so retries and polling stop cleanly.
pub(crate) async fn run_guarded<F, Fut>(ctx: &ExecutionContext, job: Job, exec: &F) -> JobResult
where
    F: Fn(Job, CancellationToken) -> Fut,
    Fut: Future<Output = JobResult>,
{
    let job_id = job.id.clone();
    if ctx.cancel.is_cancelled() {
        return JobResult::failure(job_id, "Cancelled: batch cancelled before job started", 0);
    }
    if ctx.deadline_passed() {
        return JobResult::failure(job_id, "Timed out: batch deadline elapsed before job started", 0);
    }

    let job_token = ctx.cancel.child_token();
    let fut = exec(job, job_token.clone());
    tokio::pin!(fut);

    tokio::select! {
        result = &mut fut => result,
        _ = sleep_until_deadline(ctx.deadline) => {
            warn!(job_id = %job_id, "Batch deadline elapsed, cancelling job");
            job_token.cancel();
            let mut result = fut.await;
            if !result.succeeded {
                let detail = result.error_detail.take().unwrap_or_default();
                result.error_detail = Some(format!("Timed out: batch deadline elapsed ({})", detail));
            }
            result
        }
    }
}
