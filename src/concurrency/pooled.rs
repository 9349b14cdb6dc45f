//! Pooled-parallel execution in fixed-size waves.

use super::{run_guarded, ExecutionContext, DEFAULT_MAX_CONCURRENCY};
use crate::progress::ProgressReporter;
use crate::types::{Job, JobResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Up to `max_concurrency` jobs in flight; the next wave starts only after
/// every job of the current wave has resolved.
#[derive(Debug, Clone)]
pub struct PooledParallel {
    max_concurrency: usize,
}

impl Default for PooledParallel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl PooledParallel {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn run<F, Fut>(
        &self,
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
        let mut remaining = jobs.into_iter();
        let mut wave_index = 0usize;

        loop {
            let wave: Vec<Job> = remaining.by_ref().take(self.max_concurrency).collect();
            if wave.is_empty() {
                break;
            }
            debug!(wave_index, wave_size = wave.len(), "Starting wave");

            let mut in_flight = FuturesUnordered::new();
            for job in wave {
                in_flight.push(run_guarded(ctx, job, &exec));
            }
            while let Some(result) = in_flight.next().await {
                progress.job_finished(&result);
                results.push(result);
            }

            debug!(wave_index, "Wave resolved");
            wave_index += 1;
        }

        results
    }
}
