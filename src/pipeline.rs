//! Plan pipeline: render every panel, then place its text on the result.

use crate::error::ApiError;
use crate::orchestrator::{
    BatchOrchestrator, BatchResult, DependentJob, ReferenceOutcome, ReferenceRequest, Subject,
};
use crate::placement::{BlockPlacement, PlacementAnalyzer};
use crate::progress::ProgressCallback;
use crate::types::{ArtifactRef, Job, TextBlock};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input plan: panels to render plus optional recurring subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Style applied to subject references
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub panels: Vec<PanelSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    #[serde(flatten)]
    pub job: Job,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPanel {
    #[serde(flatten)]
    pub spec: PanelSpec,
    pub artifact_ref: Option<ArtifactRef>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub attempts: u32,
    #[serde(default)]
    pub placements: Vec<BlockPlacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceOutcome>,
    pub panels: Vec<EnrichedPanel>,
    pub succeeded_count: usize,
    pub failed_count: usize,
}

pub struct Pipeline {
    orchestrator: Arc<BatchOrchestrator>,
    analyzer: Arc<PlacementAnalyzer>,
}

impl Pipeline {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, analyzer: Arc<PlacementAnalyzer>) -> Self {
        Self {
            orchestrator,
            analyzer,
        }
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    /// Render `plan` on `backend` and analyze placements for every success.
    ///
    /// Plans that mention subjects run in character-consistency mode.
    pub async fn run_plan(
        &self,
        plan: PanelPlan,
        backend: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<EnrichedPlan, ApiError> {
        let uses_subjects = plan.panels.iter().any(|p| p.subject_id.is_some());

        let (references, batch): (Vec<ReferenceOutcome>, BatchResult) = if uses_subjects {
            let request = ReferenceRequest {
                subjects: plan.subjects.clone(),
                jobs: plan
                    .panels
                    .iter()
                    .map(|p| DependentJob::new(p.job.clone(), p.subject_id.clone()))
                    .collect(),
                backend: backend.to_string(),
                style: plan.style.clone(),
            };
            let run = self
                .orchestrator
                .run_with_references(request, on_progress)
                .await?;
            (run.references, run.batch)
        } else {
            let jobs = plan.panels.iter().map(|p| p.job.clone()).collect();
            let batch = self.orchestrator.run_batch(jobs, backend, on_progress).await?;
            (Vec::new(), batch)
        };

        let analyses = plan.panels.iter().zip(&batch.results).map(|(panel, result)| {
            let analyzer = Arc::clone(&self.analyzer);
            async move {
                match &result.artifact_ref {
                    Some(artifact) if !panel.text_blocks.is_empty() => {
                        analyzer
                            .analyze_detailed(artifact, &panel.text_blocks, panel.job.aspect_ratio)
                            .await
                    }
                    _ => Vec::new(),
                }
            }
        });
        let placements = join_all(analyses).await;

        let panels: Vec<EnrichedPanel> = plan
            .panels
            .into_iter()
            .zip(batch.results)
            .zip(placements)
            .map(|((spec, result), placements)| EnrichedPanel {
                spec,
                artifact_ref: result.artifact_ref,
                succeeded: result.succeeded,
                error_detail: result.error_detail,
                attempts: result.attempts,
                placements,
            })
            .collect();

        info!(
            panels = panels.len(),
            succeeded = batch.succeeded_count,
            failed = batch.failed_count,
            "Plan finished"
        );

        Ok(EnrichedPlan {
            title: plan.title,
            backend: backend.to_string(),
            references,
            panels,
            succeeded_count: batch.succeeded_count,
            failed_count: batch.failed_count,
        })
    }
}
