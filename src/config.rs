//! Configuration System
//!
//! Hierarchical configuration for backends, orchestration, placement analysis,
//! storage and logging. Files and environment variables are merged by the `config`
//! crate and validated as a whole before anything is built from them.

use crate::artifact::StorageConfig;
use crate::backend::BackendConfig;
use crate::logging::LoggingConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::placement::{PlacementConfig, VisionConfig};
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelgenConfig {
    /// Backend profiles keyed by backend name (`gemini`, `replicate`)
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub placement: PlacementConfig,

    /// Vision backend for placement analysis; geometry fallback only when absent
    #[serde(default)]
    pub vision: Option<VisionConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Backend(String, String),
    Orchestrator(String),
    Placement(String),
    Vision(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Backend(name, msg) => write!(f, "Backend '{}': {}", name, msg),
            ValidationError::Orchestrator(msg) => write!(f, "Orchestrator: {}", msg),
            ValidationError::Placement(msg) => write!(f, "Placement: {}", msg),
            ValidationError::Vision(msg) => write!(f, "Vision: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl PanelgenConfig {
    /// Validate the entire configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (name, backend) in &self.backends {
            if let Err(e) = name.parse::<BackendKind>() {
                errors.push(ValidationError::Backend(name.clone(), e.to_string()));
            }
            if let Err(e) = backend.validate() {
                errors.push(ValidationError::Backend(name.clone(), e));
            }
        }

        if let Err(e) = self.orchestrator.validate() {
            errors.push(ValidationError::Orchestrator(e));
        }

        // Named backends must also be configured
        for name in [
            &self.orchestrator.default_backend,
            &self.orchestrator.reference_backend,
            &self.orchestrator.reference_fallback_backend,
        ]
        .into_iter()
        .flatten()
        {
            if !self.backends.contains_key(name.as_str()) {
                errors.push(ValidationError::Orchestrator(format!(
                    "backend '{}' is referenced but has no [backends.{}] table",
                    name, name
                )));
            }
        }

        if let Err(e) = self.placement.validate() {
            errors.push(ValidationError::Placement(e));
        }
        if let Some(vision) = &self.vision {
            if let Err(e) = vision.validate() {
                errors.push(ValidationError::Vision(e));
            }
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
