//! panelgen: batch generation of panel images across rate-limited backends
//!
//! Jobs are rendered through a backend adapter under a per-backend concurrency
//! strategy (paced sequential or pooled parallel), with retry, asynchronous
//! polling, subject-reference workflows and text placement analysis on top.

pub mod artifact;
pub mod backend;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod placement;
pub mod poller;
pub mod progress;
pub mod retry;
pub mod types;

pub use error::{ApiError, BackendError};
pub use orchestrator::{BatchOrchestrator, BatchResult};
pub use types::{ArtifactRef, AspectRatio, BackendKind, Job, JobResult};
