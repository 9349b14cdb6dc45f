//! Batch Orchestrator
//!
//! Entry point for generation batches. Validates the batch, picks the backend's
//! strategy instance, runs every job through the retry loop (and the poller for
//! asynchronous backends), and returns one result per job in submission order.

pub mod reference;

pub use reference::{DependentJob, ReferenceOutcome, ReferenceRequest, ReferenceRunResult, Subject};

use crate::artifact::ArtifactStore;
use crate::backend::{BackendAdapter, BackendConfig, BackendFactory};
use crate::concurrency::{ConcurrencyStrategy, ExecutionContext};
use crate::config::PanelgenConfig;
use crate::error::{ApiError, BackendError};
use crate::poller::AsyncJobPoller;
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::types::{ArtifactRef, BackendKind, Job, JobResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Orchestrator-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Backend used when a caller does not name one
    #[serde(default)]
    pub default_backend: Option<String>,

    /// Backend that renders subject reference images (defaults to the batch backend)
    #[serde(default)]
    pub reference_backend: Option<String>,

    /// Backend for dependents whose subject reference could not be produced
    #[serde(default)]
    pub reference_fallback_backend: Option<String>,

    /// Wall-clock limit for one batch
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,
}

impl OrchestratorConfig {
    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("default_backend", &self.default_backend),
            ("reference_backend", &self.reference_backend),
            ("reference_fallback_backend", &self.reference_fallback_backend),
        ] {
            if let Some(name) = value {
                name.parse::<BackendKind>()
                    .map_err(|_| format!("{}: unknown backend '{}'", field, name))?;
            }
        }
        if self.batch_deadline_secs == Some(0) {
            return Err("batch_deadline_secs must be positive".to_string());
        }
        Ok(())
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// One entry per submitted job, in submission order
    pub results: Vec<JobResult>,
    pub succeeded_count: usize,
    pub failed_count: usize,
}

impl BatchResult {
    /// Order `results` like `jobs`; a job with no result is recorded as failed.
    pub fn assemble(jobs: &[Job], results: Vec<JobResult>) -> Self {
        let mut by_id: HashMap<String, JobResult> =
            results.into_iter().map(|r| (r.id.clone(), r)).collect();
        let results: Vec<JobResult> = jobs
            .iter()
            .map(|job| {
                by_id
                    .remove(&job.id)
                    .unwrap_or_else(|| JobResult::failure(&job.id, "No result recorded", 0))
            })
            .collect();
        let succeeded_count = results.iter().filter(|r| r.succeeded).count();
        Self {
            failed_count: results.len() - succeeded_count,
            succeeded_count,
            results,
        }
    }

    pub fn get(&self, id: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Everything needed to run jobs on one backend.
struct BackendRuntime {
    adapter: BackendAdapter,
    strategy: Mutex<ConcurrencyStrategy>,
    retry: RetryPolicy,
    poller: AsyncJobPoller,
}

impl BackendRuntime {
    fn new(adapter: BackendAdapter, config: &BackendConfig) -> Self {
        let kind = adapter.kind();
        Self {
            strategy: Mutex::new(config.strategy(kind)),
            retry: config.retry_policy(),
            poller: AsyncJobPoller::new(config.poller_config()),
            adapter,
        }
    }

    /// Retry loop around single attempts; always yields a result.
    async fn execute_job(&self, job: Job, cancel: CancellationToken) -> JobResult {
        let kind = self.adapter.kind();
        let span = info_span!("job", job_id = %job.id, backend = %kind);
        async {
            let label = format!("{}:{}", kind, job.id);
            let outcome =
                run_with_retry(&self.retry, &cancel, &label, |_attempt| self.attempt(&job, &cancel))
                    .await;
            match outcome {
                Ok(attempted) => {
                    info!(attempts = attempted.attempts, artifact = %attempted.value, "Job succeeded");
                    JobResult::success(job.id.clone(), attempted.value, attempted.attempts)
                }
                Err(failure) => {
                    JobResult::failure(job.id.clone(), failure.last_error.to_string(), failure.attempts)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, job: &Job, cancel: &CancellationToken) -> Result<ArtifactRef, BackendError> {
        self.adapter.validate(job)?;
        match &self.adapter {
            BackendAdapter::Sync(backend) => backend.submit(job).await,
            BackendAdapter::Async(backend) => self.poller.run(backend.as_ref(), job, cancel).await,
        }
    }
}

pub struct BatchOrchestrator {
    backends: HashMap<BackendKind, Arc<BackendRuntime>>,
    settings: OrchestratorConfig,
    batch_counter: AtomicU64,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("backends", &self.backends())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BatchOrchestrator {
    pub fn new(settings: OrchestratorConfig) -> Self {
        Self {
            backends: HashMap::new(),
            settings,
            batch_counter: AtomicU64::new(0),
        }
    }

    /// Build every backend named in `config.backends`.
    ///
    /// Backends without an API key are skipped with a warning.
    pub fn from_config(config: &PanelgenConfig, store: Arc<ArtifactStore>) -> Result<Self, ApiError> {
        let mut orchestrator = Self::new(config.orchestrator.clone());
        for (name, backend_config) in &config.backends {
            let kind: BackendKind = name.parse()?;
            let adapter = match BackendFactory::create(kind, backend_config, Arc::clone(&store)) {
                Ok(adapter) => adapter,
                // Left unregistered; batches naming it get BackendNotConfigured.
                Err(ApiError::BackendNotConfigured(reason)) => {
                    warn!(backend = %kind, reason = %reason, "Skipping backend without credentials");
                    continue;
                }
                Err(err) => return Err(err),
            };
            orchestrator.register(adapter, backend_config);
        }
        Ok(orchestrator)
    }

    /// Register (or replace) the adapter for its backend kind.
    pub fn register(&mut self, adapter: BackendAdapter, config: &BackendConfig) -> &mut Self {
        let kind = adapter.kind();
        self.backends
            .insert(kind, Arc::new(BackendRuntime::new(adapter, config)));
        self
    }

    pub fn settings(&self) -> &OrchestratorConfig {
        &self.settings
    }

    pub fn backends(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<BackendKind> = self.backends.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Strategy summary for a configured backend.
    pub async fn describe_backend(&self, kind: BackendKind) -> Option<String> {
        let runtime = self.backends.get(&kind)?;
        let strategy = runtime.strategy.lock().await.describe();
        let latency = if runtime.adapter.is_async() { "async" } else { "sync" };
        Some(format!("{} [{}]", strategy, latency))
    }

    /// Resolve a backend identifier to a configured backend.
    pub fn resolve_backend(&self, backend: &str) -> Result<BackendKind, ApiError> {
        let kind: BackendKind = backend.parse()?;
        if self.backends.contains_key(&kind) {
            Ok(kind)
        } else {
            Err(ApiError::BackendNotConfigured(kind.to_string()))
        }
    }

    /// Backend to use when the caller names none.
    pub fn default_backend(&self) -> Result<BackendKind, ApiError> {
        match &self.settings.default_backend {
            Some(name) => self.resolve_backend(name),
            None => self.backends().into_iter().next().ok_or_else(|| {
                ApiError::BackendNotConfigured("no backends configured".to_string())
            }),
        }
    }

    pub async fn run_batch(
        &self,
        jobs: Vec<Job>,
        backend: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchResult, ApiError> {
        self.run_batch_with_cancel(jobs, backend, on_progress, CancellationToken::new())
            .await
    }

    /// As [`run_batch`](Self::run_batch), stopping early when `cancel` fires.
    pub async fn run_batch_with_cancel(
        &self,
        jobs: Vec<Job>,
        backend: &str,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<BatchResult, ApiError> {
        let kind = self.resolve_backend(backend)?;
        validate_batch(&jobs)?;
        self.run_on(kind, jobs, on_progress, cancel, false).await
    }

    /// Render a single subject reference image.
    pub async fn generate_reference(
        &self,
        subject_description: &str,
        style: &str,
    ) -> Result<ArtifactRef, ApiError> {
        let kind = self.reference_backend(None)?;
        let job = Job::new(
            format!("ref-{}", self.next_batch_id()),
            reference::reference_prompt(subject_description, style),
        );
        let batch = self
            .run_on(kind, vec![job], None, CancellationToken::new(), true)
            .await?;
        let result = batch.results.into_iter().next();
        match result {
            Some(JobResult {
                artifact_ref: Some(artifact),
                ..
            }) => Ok(artifact),
            Some(failed) => Err(ApiError::ReferenceFailed {
                subject: subject_description.to_string(),
                message: failed
                    .error_detail
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            None => Err(ApiError::ReferenceFailed {
                subject: subject_description.to_string(),
                message: "no result recorded".to_string(),
            }),
        }
    }

    fn reference_backend(&self, batch_backend: Option<BackendKind>) -> Result<BackendKind, ApiError> {
        match (&self.settings.reference_backend, batch_backend) {
            (Some(name), _) => self.resolve_backend(name),
            (None, Some(kind)) => Ok(kind),
            (None, None) => self.default_backend(),
        }
    }

    fn reference_fallback_backend(&self) -> Result<Option<BackendKind>, ApiError> {
        self.settings
            .reference_fallback_backend
            .as_deref()
            .map(|name| self.resolve_backend(name))
            .transpose()
    }

    fn next_batch_id(&self) -> String {
        let n = self.batch_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"), n)
    }

    /// Run already-validated jobs on a configured backend.
    ///
    /// `sequential` forces one job at a time: paced backends use their own
    /// instance, pooled ones a single-slot pool.
    async fn run_on(
        &self,
        kind: BackendKind,
        jobs: Vec<Job>,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
        sequential: bool,
    ) -> Result<BatchResult, ApiError> {
        let runtime = self
            .backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| ApiError::BackendNotConfigured(kind.to_string()))?;

        let batch_id = self.next_batch_id();
        let deadline = self
            .settings
            .batch_deadline()
            .map(|d| tokio::time::Instant::now() + d);
        let ctx = ExecutionContext::new(cancel, deadline);
        let mut progress = ProgressReporter::new(batch_id.clone(), kind, jobs.len(), on_progress);

        info!(batch_id = %batch_id, backend = %kind, jobs = jobs.len(), "Batch started");

        let exec = |job: Job, token: CancellationToken| {
            let runtime = Arc::clone(&runtime);
            async move { runtime.execute_job(job, token).await }
        };

        let mut strategy = runtime.strategy.lock().await;
        let results = match &mut *strategy {
            ConcurrencyStrategy::PooledParallel(_) if sequential => {
                let mut single = ConcurrencyStrategy::PooledParallel(
                    crate::concurrency::PooledParallel::new(1),
                );
                single.run(jobs.clone(), &ctx, &mut progress, exec).await
            }
            strategy => strategy.run(jobs.clone(), &ctx, &mut progress, exec).await,
        };
        drop(strategy);

        let batch = BatchResult::assemble(&jobs, results);
        info!(
            batch_id = %batch_id,
            backend = %kind,
            succeeded = batch.succeeded_count,
            failed = batch.failed_count,
            "Batch finished"
        );
        Ok(batch)
    }

    /// Run jobs grouped by backend, each group under its own strategy, and
    /// merge the results in `order`.
    async fn run_partitions(
        &self,
        order: &[Job],
        partitions: BTreeMap<BackendKind, Vec<Job>>,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<BatchResult, ApiError> {
        let runs = partitions.into_iter().map(|(kind, jobs)| {
            let on_progress = on_progress.clone();
            let cancel = cancel.clone();
            async move { self.run_on(kind, jobs, on_progress, cancel, false).await }
        });
        let mut merged = Vec::with_capacity(order.len());
        for outcome in futures::future::join_all(runs).await {
            merged.extend(outcome?.results);
        }
        Ok(BatchResult::assemble(order, merged))
    }
}

/// Batch-level checks that fail before any job runs.
pub fn validate_batch(jobs: &[Job]) -> Result<(), ApiError> {
    if jobs.is_empty() {
        return Err(ApiError::EmptyBatch);
    }
    let mut seen = HashSet::with_capacity(jobs.len());
    for job in jobs {
        if job.id.trim().is_empty() {
            return Err(ApiError::InvalidJob {
                id: job.id.clone(),
                reason: "job id cannot be empty".to_string(),
            });
        }
        if !seen.insert(job.id.as_str()) {
            return Err(ApiError::DuplicateJobId(job.id.clone()));
        }
    }
    Ok(())
}
