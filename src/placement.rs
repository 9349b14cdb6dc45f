//! Placement Analysis
//!
//! Decides where text overlays go on a rendered artifact. Sizes come from the
//! deterministic geometry estimator; positions come from a vision backend when it
//! answers, and from a fixed corner layout when it does not.

pub mod analyzer;
pub mod geometry;
pub mod vision;

pub use analyzer::{BlockPlacement, Corner, PlacementAnalyzer, PlacementSource};
pub use geometry::{
    clamp_placement, estimate_size, estimate_size_with_bounds, GeometryBounds,
};
pub use vision::{
    OpenAiVisionClient, SuggestedPlacement, VisionBackend, VisionConfig, VisionRequest,
};

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placement analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Minimum distance from every frame edge, in percent
    #[serde(default = "default_margin")]
    pub margin: f64,

    /// Largest difference (percentage points) at which a suggested size is trusted
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,

    /// Spacing between vision calls
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,

    /// Vision attempts per artifact before falling back
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub bounds: GeometryBounds,
}

fn default_margin() -> f64 {
    2.0
}

fn default_size_tolerance() -> f64 {
    5.0
}

fn default_pacing_delay_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            margin: default_margin(),
            size_tolerance: default_size_tolerance(),
            pacing_delay_ms: default_pacing_delay_ms(),
            max_attempts: default_max_attempts(),
            bounds: GeometryBounds::default(),
        }
    }
}

impl PlacementConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=10.0).contains(&self.margin) {
            return Err(format!("margin must be within 0..=10, got {}", self.margin));
        }
        if !self.size_tolerance.is_finite() || self.size_tolerance < 0.0 {
            return Err(format!(
                "size_tolerance must be non-negative, got {}",
                self.size_tolerance
            ));
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        self.bounds.validate(self.margin)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_attempts)
    }
}
