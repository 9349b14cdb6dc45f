//! Rendering Backend Abstraction
//!
//! Uniform contract over heterogeneous image-generation services. A backend is
//! either synchronous (one call returns the finished artifact) or asynchronous
//! (submit returns a handle that must be polled). Every failure leaving this layer
//! is already a classified [`BackendError`].

use crate::error::BackendError;
use crate::types::{ArtifactRef, AsyncJobHandle, BackendKind, Job, PollState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod factory;
pub mod gemini;
pub mod http;
pub mod profile;
pub mod replicate;

pub use factory::BackendFactory;
pub use profile::BackendConfig;

/// Backend whose submit call blocks until the artifact exists.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Checks that need no network I/O.
    fn validate(&self, job: &Job) -> Result<(), BackendError> {
        job.validate()
    }

    async fn submit(&self, job: &Job) -> Result<ArtifactRef, BackendError>;
}

/// Result of an async backend's bounded synchronous attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(ArtifactRef),
    /// The backend accepted the job but it is still running.
    Pending(AsyncJobHandle),
}

/// One observation of a remote job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus {
    pub state: PollState,
    pub artifact: Option<ArtifactRef>,
    pub error: Option<String>,
}

impl PollStatus {
    pub fn new(state: PollState) -> Self {
        Self {
            state,
            artifact: None,
            error: None,
        }
    }

    pub fn completed(artifact: ArtifactRef) -> Self {
        Self {
            state: PollState::Completed,
            artifact: Some(artifact),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: PollState::Failed,
            artifact: None,
            error: Some(message.into()),
        }
    }
}

/// Backend that runs jobs remotely and reports progress through polling.
#[async_trait]
pub trait AsyncBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn validate(&self, job: &Job) -> Result<(), BackendError> {
        job.validate()
    }

    /// Submit and ask the backend to hold the response for up to `wait`.
    async fn submit_and_wait(&self, job: &Job, wait: Duration)
        -> Result<SubmitOutcome, BackendError>;

    /// Submit without waiting.
    async fn submit(&self, job: &Job) -> Result<AsyncJobHandle, BackendError>;

    async fn poll(&self, handle: &AsyncJobHandle) -> Result<PollStatus, BackendError>;
}

/// A configured backend, tagged by latency model.
#[derive(Clone)]
pub enum BackendAdapter {
    Sync(Arc<dyn SyncBackend>),
    Async(Arc<dyn AsyncBackend>),
}

impl BackendAdapter {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendAdapter::Sync(backend) => backend.kind(),
            BackendAdapter::Async(backend) => backend.kind(),
        }
    }

    pub fn validate(&self, job: &Job) -> Result<(), BackendError> {
        match self {
            BackendAdapter::Sync(backend) => backend.validate(job),
            BackendAdapter::Async(backend) => backend.validate(job),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, BackendAdapter::Async(_))
    }
}

impl std::fmt::Debug for BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendAdapter::Sync(backend) => write!(f, "BackendAdapter::Sync({})", backend.kind()),
            BackendAdapter::Async(backend) => {
                write!(f, "BackendAdapter::Async({})", backend.kind())
            }
        }
    }
}

/// Aspect ratios accepted by a backend; anything else fails validation.
pub(crate) fn check_aspect_ratio(
    kind: BackendKind,
    job: &Job,
    supported: &[&str],
) -> Result<(), BackendError> {
    let ratio = job.aspect_ratio.to_string();
    if supported.contains(&ratio.as_str()) {
        Ok(())
    } else {
        Err(BackendError::Validation(format!(
            "{} does not support aspect ratio {} (job '{}')",
            kind, ratio, job.id
        )))
    }
}
