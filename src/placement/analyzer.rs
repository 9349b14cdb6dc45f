//! Per-artifact placement analysis with a deterministic corner fallback.

use super::geometry::{clamp_placement, estimate_size_with_bounds};
use super::vision::{SuggestedPlacement, VisionBackend, VisionBlock, VisionRequest};
use super::PlacementConfig;
use crate::artifact::ArtifactStore;
use crate::concurrency::Pacer;
use crate::error::BackendError;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::types::{ArtifactRef, AspectRatio, Placement, Size, TailDirection, TextBlock, TextKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frame corner used by the fallback layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    const ORDER: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Round-robin corner for the block at `index`.
    pub fn for_index(index: usize) -> Corner {
        Self::ORDER[index % Self::ORDER.len()]
    }

    /// Tail pointing from the corner toward the frame centre.
    pub fn inward_tail(&self) -> TailDirection {
        match self {
            Corner::TopLeft => TailDirection::BottomRight,
            Corner::TopRight => TailDirection::BottomLeft,
            Corner::BottomLeft => TailDirection::TopRight,
            Corner::BottomRight => TailDirection::TopLeft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementSource {
    Vision,
    Fallback,
}

/// Final placement for one block and how it was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPlacement {
    pub block_id: String,
    pub placement: Placement,
    pub source: PlacementSource,
}

/// Fallback placement for the block at `index`.
pub fn fallback_placement(index: usize, block: &TextBlock, size: Size, margin: f64) -> Placement {
    let corner = Corner::for_index(index);
    let (x, y) = match corner {
        Corner::TopLeft => (margin, margin),
        Corner::TopRight => (100.0 - margin - size.width, margin),
        Corner::BottomLeft => (margin, 100.0 - margin - size.height),
        Corner::BottomRight => (100.0 - margin - size.width, 100.0 - margin - size.height),
    };
    let tail = match block.kind {
        TextKind::Narrative => TailDirection::None,
        TextKind::Dialogue | TextKind::Effect => corner.inward_tail(),
    };
    clamp_placement(x, y, size.width, size.height, tail, margin)
}

/// Merge a vision suggestion with the estimate.
///
/// Each suggested dimension is used only when it lies within `size_tolerance`
/// of the estimate.
pub fn reconcile(
    block: &TextBlock,
    estimate: Size,
    suggestion: &SuggestedPlacement,
    config: &PlacementConfig,
) -> Placement {
    let within = |suggested: Option<f64>, estimated: f64| match suggested {
        Some(value) if value.is_finite() && (value - estimated).abs() <= config.size_tolerance => {
            value
        }
        _ => estimated,
    };
    let width = within(suggestion.width, estimate.width);
    let height = within(suggestion.height, estimate.height);

    let tail = match block.kind {
        TextKind::Narrative => TailDirection::None,
        TextKind::Dialogue => suggested_tail(suggestion).unwrap_or(TailDirection::Bottom),
        TextKind::Effect => suggested_tail(suggestion).unwrap_or(TailDirection::None),
    };
    clamp_placement(suggestion.x, suggestion.y, width, height, tail, config.margin)
}

fn suggested_tail(suggestion: &SuggestedPlacement) -> Option<TailDirection> {
    suggestion.tail.as_deref().and_then(|t| t.parse().ok())
}

pub struct PlacementAnalyzer {
    vision: Option<Arc<dyn VisionBackend>>,
    store: Arc<ArtifactStore>,
    config: PlacementConfig,
    retry: RetryPolicy,
    pacer: Mutex<Pacer>,
}

impl PlacementAnalyzer {
    pub fn new(
        vision: Option<Arc<dyn VisionBackend>>,
        store: Arc<ArtifactStore>,
        config: PlacementConfig,
    ) -> Self {
        let retry = config.retry_policy();
        let pacer = Mutex::new(Pacer::new(config.pacing_delay()));
        Self {
            vision,
            store,
            config,
            retry,
            pacer,
        }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Placements for `blocks`, in block order. Never fails.
    pub async fn analyze(
        &self,
        artifact: &ArtifactRef,
        blocks: &[TextBlock],
        aspect_ratio: AspectRatio,
    ) -> Vec<Placement> {
        self.analyze_detailed(artifact, blocks, aspect_ratio)
            .await
            .into_iter()
            .map(|b| b.placement)
            .collect()
    }

    pub async fn analyze_detailed(
        &self,
        artifact: &ArtifactRef,
        blocks: &[TextBlock],
        aspect_ratio: AspectRatio,
    ) -> Vec<BlockPlacement> {
        if blocks.is_empty() {
            return Vec::new();
        }

        let estimates: Vec<Size> = blocks
            .iter()
            .map(|b| estimate_size_with_bounds(&b.text, b.kind, aspect_ratio, &self.config.bounds))
            .collect();

        let suggestions = match self.suggest(artifact, blocks, &estimates, aspect_ratio).await {
            Ok(suggestions) => suggestions,
            Err(err) => {
                warn!(artifact = %artifact, error = %err, "Vision analysis failed, using fallback layout");
                Vec::new()
            }
        };

        let mut by_id: HashMap<&str, &SuggestedPlacement> = HashMap::new();
        for suggestion in &suggestions {
            by_id.entry(suggestion.id.as_str()).or_insert(suggestion);
        }

        let placements: Vec<BlockPlacement> = blocks
            .iter()
            .zip(estimates)
            .enumerate()
            .map(|(index, (block, estimate))| match by_id.get(block.id.as_str()) {
                Some(suggestion) => BlockPlacement {
                    block_id: block.id.clone(),
                    placement: reconcile(block, estimate, suggestion, &self.config),
                    source: PlacementSource::Vision,
                },
                None => BlockPlacement {
                    block_id: block.id.clone(),
                    placement: fallback_placement(index, block, estimate, self.config.margin),
                    source: PlacementSource::Fallback,
                },
            })
            .collect();

        let fallback_count = placements
            .iter()
            .filter(|p| p.source == PlacementSource::Fallback)
            .count();
        info!(
            artifact = %artifact,
            blocks = placements.len(),
            fallback_count,
            "Placement analysis finished"
        );
        placements
    }

    async fn suggest(
        &self,
        artifact: &ArtifactRef,
        blocks: &[TextBlock],
        estimates: &[Size],
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<SuggestedPlacement>, BackendError> {
        let Some(vision) = &self.vision else {
            debug!(artifact = %artifact, "No vision backend configured");
            return Ok(Vec::new());
        };

        let image_url = self.store.image_url(artifact).await?;
        let request = VisionRequest {
            image_url,
            aspect_ratio,
            blocks: blocks
                .iter()
                .zip(estimates)
                .map(|(block, estimate)| VisionBlock {
                    id: block.id.clone(),
                    kind: block.kind,
                    text: block.text.clone(),
                    speaker: block.speaker.clone(),
                    estimated: *estimate,
                })
                .collect(),
        };

        let cancel = CancellationToken::new();
        let label = format!("placement:{}", artifact);
        let request = &request;
        run_with_retry(&self.retry, &cancel, &label, |_attempt| async move {
            let wait = self.pacer.lock().reserve(Instant::now());
            if !wait.is_zero() {
                debug!(delay_ms = wait.as_millis() as u64, "Pacing vision call");
                tokio::time::sleep(wait).await;
            }
            vision.suggest(request).await
        })
        .await
        .map(|attempted| attempted.value)
        .map_err(|failure| failure.last_error)
    }
}
