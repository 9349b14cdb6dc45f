//! Character-consistency mode: render one reference per subject, then thread it
//! into every job that depicts that subject.

use super::{validate_batch, BatchOrchestrator, BatchResult};
use crate::error::ApiError;
use crate::progress::ProgressCallback;
use crate::types::{ArtifactRef, BackendKind, Job};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A recurring character or object that needs a consistent look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub description: String,
    /// Overrides the request-wide style for this subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// A job optionally tied to a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentJob {
    #[serde(flatten)]
    pub job: Job,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl DependentJob {
    pub fn new(job: Job, subject_id: Option<String>) -> Self {
        Self { job, subject_id }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRequest {
    pub subjects: Vec<Subject>,
    pub jobs: Vec<DependentJob>,
    pub backend: String,
    pub style: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceOutcome {
    pub subject_id: String,
    pub artifact_ref: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRunResult {
    pub references: Vec<ReferenceOutcome>,
    pub batch: BatchResult,
}

pub(crate) fn reference_prompt(description: &str, style: &str) -> String {
    let style = style.trim();
    if style.is_empty() {
        format!(
            "Character reference sheet: {}. Full body, neutral pose, plain background.",
            description.trim()
        )
    } else {
        format!(
            "Character reference sheet: {}. Full body, neutral pose, plain background. Style: {}.",
            description.trim(),
            style
        )
    }
}

fn check_subjects(request: &ReferenceRequest) -> Result<(), ApiError> {
    let mut known = HashSet::new();
    for subject in &request.subjects {
        if subject.id.trim().is_empty() || subject.description.trim().is_empty() {
            return Err(ApiError::InvalidJob {
                id: subject.id.clone(),
                reason: "subject needs an id and a description".to_string(),
            });
        }
        if !known.insert(subject.id.as_str()) {
            return Err(ApiError::InvalidJob {
                id: subject.id.clone(),
                reason: "duplicate subject id".to_string(),
            });
        }
    }
    for dependent in &request.jobs {
        if let Some(subject_id) = &dependent.subject_id {
            if !known.contains(subject_id.as_str()) {
                return Err(ApiError::InvalidJob {
                    id: dependent.job.id.clone(),
                    reason: format!("unknown subject '{}'", subject_id),
                });
            }
        }
    }
    Ok(())
}

impl BatchOrchestrator {
    /// Two-phase run: a sequential reference sub-batch, then the dependent jobs.
    ///
    /// Reference failures do not fail the run. Dependents of a failed subject go
    /// without a reference, on the configured fallback backend when there is one.
    pub async fn run_with_references(
        &self,
        request: ReferenceRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ReferenceRunResult, ApiError> {
        let kind = self.resolve_backend(&request.backend)?;
        let jobs: Vec<Job> = request.jobs.iter().map(|d| d.job.clone()).collect();
        validate_batch(&jobs)?;
        check_subjects(&request)?;

        let reference_kind = self.reference_backend(Some(kind))?;
        let fallback_kind = self.reference_fallback_backend()?;

        let referenced: HashSet<&str> = request
            .jobs
            .iter()
            .filter_map(|d| d.subject_id.as_deref())
            .collect();
        let needed: Vec<&Subject> = request
            .subjects
            .iter()
            .filter(|s| referenced.contains(s.id.as_str()))
            .collect();

        let references = if needed.is_empty() {
            Vec::new()
        } else {
            info!(
                subjects = needed.len(),
                backend = %reference_kind,
                "Generating subject references"
            );
            let reference_jobs: Vec<Job> = needed
                .iter()
                .map(|subject| {
                    let style = subject.style.as_deref().unwrap_or(&request.style);
                    Job::new(
                        format!("ref:{}", subject.id),
                        reference_prompt(&subject.description, style),
                    )
                })
                .collect();
            let batch = self
                .run_on(
                    reference_kind,
                    reference_jobs,
                    on_progress.clone(),
                    CancellationToken::new(),
                    true,
                )
                .await?;
            needed
                .iter()
                .zip(batch.results)
                .map(|(subject, result)| ReferenceOutcome {
                    subject_id: subject.id.clone(),
                    artifact_ref: result.artifact_ref,
                    error_detail: result.error_detail,
                })
                .collect()
        };

        let resolved: HashMap<&str, Option<&ArtifactRef>> = references
            .iter()
            .map(|r: &ReferenceOutcome| (r.subject_id.as_str(), r.artifact_ref.as_ref()))
            .collect();

        let mut partitions: BTreeMap<BackendKind, Vec<Job>> = BTreeMap::new();
        for dependent in &request.jobs {
            let (job, target) = match dependent.subject_id.as_deref() {
                None => (dependent.job.clone(), kind),
                Some(subject_id) => match resolved.get(subject_id).copied().flatten() {
                    Some(reference) => (
                        dependent.job.clone().with_reference(Some(reference.clone())),
                        kind,
                    ),
                    None => {
                        let target = fallback_kind.unwrap_or(kind);
                        warn!(
                            job_id = %dependent.job.id,
                            subject_id,
                            backend = %target,
                            "Subject reference unavailable, rendering without it"
                        );
                        (dependent.job.clone().with_reference(None), target)
                    }
                },
            };
            partitions.entry(target).or_default().push(job);
        }

        let batch = self
            .run_partitions(&jobs, partitions, on_progress, CancellationToken::new())
            .await?;
        Ok(ReferenceRunResult { references, batch })
    }
}
