//! Batch progress events and best-effort delivery to a caller-supplied callback.

use crate::types::{BackendKind, JobResult};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// One progress notification, emitted after each job resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub backend: BackendKind,
    pub completed: usize,
    pub total: usize,
    pub job_id: String,
    pub succeeded: bool,
    pub message: String,
}

/// Caller hook for progress. An `Err` is logged and ignored.
pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) -> Result<(), String> + Send + Sync>;

/// Counts resolved jobs for one batch and forwards events to the callback.
pub struct ProgressReporter {
    batch_id: String,
    backend: Option<BackendKind>,
    total: usize,
    completed: usize,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(
        batch_id: impl Into<String>,
        backend: BackendKind,
        total: usize,
        callback: Option<ProgressCallback>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            backend: Some(backend),
            total,
            completed: 0,
            callback,
        }
    }

    /// Reporter that only counts.
    pub fn disabled(total: usize) -> Self {
        Self {
            batch_id: String::new(),
            backend: None,
            total,
            completed: 0,
            callback: None,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn job_finished(&mut self, result: &JobResult) {
        self.completed += 1;
        debug!(
            batch_id = %self.batch_id,
            job_id = %result.id,
            completed = self.completed,
            total = self.total,
            succeeded = result.succeeded,
            "Job resolved"
        );

        let (Some(callback), Some(backend)) = (&self.callback, self.backend) else {
            return;
        };
        let event = BatchProgress {
            batch_id: self.batch_id.clone(),
            backend,
            completed: self.completed,
            total: self.total,
            job_id: result.id.clone(),
            succeeded: result.succeeded,
            message: status_message(result, self.completed, self.total),
        };

        match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(batch_id = %self.batch_id, job_id = %event.job_id, error = %err, "Progress callback failed");
            }
            Err(_) => {
                warn!(batch_id = %self.batch_id, job_id = %event.job_id, "Progress callback panicked");
            }
        }
    }
}

fn status_message(result: &JobResult, completed: usize, total: usize) -> String {
    if result.succeeded {
        format!("Job {} completed ({}/{})", result.id, completed, total)
    } else {
        format!(
            "Job {} failed after {} attempt(s) ({}/{}): {}",
            result.id,
            result.attempts,
            completed,
            total,
            result.error_detail.as_deref().unwrap_or("unknown error")
        )
    }
}
