//! Error types for the panel generation orchestrator.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Validation,
    RateLimited,
    Transient,
    Timeout,
    Unrecoverable,
    Unknown,
}

/// Errors produced at the backend adapter boundary.
///
/// Every backend failure is classified exactly once, where the response is
/// decoded, so nothing downstream inspects message text.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Backend rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient backend error: {0}")]
    Transient(String),

    #[error("Backend transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unrecoverable backend error: {0}")]
    Unrecoverable(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Validation(_) => ErrorClass::Validation,
            BackendError::RateLimited { .. } => ErrorClass::RateLimited,
            BackendError::Transient(_) | BackendError::Transport(_) => ErrorClass::Transient,
            BackendError::Timeout(_) => ErrorClass::Timeout,
            BackendError::Unrecoverable(_) | BackendError::Cancelled(_) => {
                ErrorClass::Unrecoverable
            }
            BackendError::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// Wait hint reported by the backend, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        BackendError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }
}

/// Artifact storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid artifact reference: {0}")]
    InvalidReference(String),

    #[error("Artifact fetch failed: {0}")]
    FetchFailed(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Crate-level errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Backend not configured: {0}")]
    BackendNotConfigured(String),

    #[error("Batch contains no jobs")]
    EmptyBatch,

    #[error("Duplicate job id in batch: {0}")]
    DuplicateJobId(String),

    #[error("Invalid job {id}: {reason}")]
    InvalidJob { id: String, reason: String },

    #[error("Reference generation failed for '{subject}': {message}")]
    ReferenceFailed { subject: String, message: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<StorageError> for BackendError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FetchFailed(msg) => BackendError::Transport(msg),
            other => BackendError::Unknown(other.to_string()),
        }
    }
}
