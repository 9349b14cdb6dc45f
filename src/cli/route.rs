//! CLI route: single route table and run context.

use crate::artifact::ArtifactStore;
use crate::cli::command_name;
use crate::cli::output::{format_backends_text, format_estimate_text, format_progress_line};
use crate::cli::parse::Commands;
use crate::config::{ConfigLoader, PanelgenConfig};
use crate::error::{ApiError, StorageError};
use crate::orchestrator::BatchOrchestrator;
use crate::pipeline::{PanelPlan, Pipeline};
use crate::placement::{estimate_size_with_bounds, OpenAiVisionClient, PlacementAnalyzer, VisionBackend};
use crate::progress::{BatchProgress, ProgressCallback};
use crate::types::{Job, TextKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, info_span};

/// Runtime context for CLI execution: workspace, merged config and async runtime.
pub struct RunContext {
    workspace_root: PathBuf,
    config: PanelgenConfig,
    runtime: Runtime,
}

impl RunContext {
    /// Load configuration for the workspace (or from `config_path` when given).
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(&path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        let runtime = Runtime::new()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create async runtime: {}", e)))?;
        Ok(Self {
            workspace_root,
            config,
            runtime,
        })
    }

    pub fn config(&self) -> &PanelgenConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let _span = info_span!("command", name = command_name(command)).entered();
        match command {
            Commands::Validate => self.handle_validate(),
            Commands::Estimate {
                text,
                kind,
                aspect,
                format,
            } => {
                let kind = TextKind::from(*kind);
                let size =
                    estimate_size_with_bounds(text, kind, *aspect, &self.config.placement.bounds);
                match format.as_str() {
                    "json" => to_json(&json!({
                        "kind": kind,
                        "aspect_ratio": aspect,
                        "width": size.width,
                        "height": size.height,
                    })),
                    _ => Ok(format_estimate_text(kind, *aspect, size)),
                }
            }
            Commands::Backends { format } => {
                let orchestrator = self.build_orchestrator()?;
                let backends = self.runtime.block_on(async {
                    let mut described = Vec::new();
                    for kind in orchestrator.backends() {
                        if let Some(summary) = orchestrator.describe_backend(kind).await {
                            described.push((kind, summary));
                        }
                    }
                    described
                });
                match format.as_str() {
                    "json" => to_json(
                        &backends
                            .iter()
                            .map(|(kind, strategy)| json!({ "backend": kind, "strategy": strategy }))
                            .collect::<Vec<_>>(),
                    ),
                    _ => Ok(format_backends_text(&backends)),
                }
            }
            Commands::Reference { description, style } => {
                let orchestrator = self.build_orchestrator()?;
                let artifact = self
                    .runtime
                    .block_on(orchestrator.generate_reference(description, style))?;
                Ok(artifact.to_string())
            }
            Commands::Batch {
                jobs,
                backend,
                output,
                quiet,
            } => {
                let jobs: Vec<Job> = read_json(jobs)?;
                let orchestrator = self.build_orchestrator()?;
                let backend = self.pick_backend(&orchestrator, backend.as_deref())?;
                let result = self.runtime.block_on(orchestrator.run_batch(
                    jobs,
                    &backend,
                    progress_callback(*quiet),
                ))?;
                let summary = format!(
                    "{} succeeded, {} failed",
                    result.succeeded_count, result.failed_count
                );
                emit(&result, output.as_deref(), summary)
            }
            Commands::Run {
                plan,
                backend,
                output,
                quiet,
            } => {
                let plan: PanelPlan = read_json(plan)?;
                let orchestrator = Arc::new(self.build_orchestrator()?);
                let backend = self.pick_backend(&orchestrator, backend.as_deref())?;
                let analyzer = Arc::new(self.build_analyzer()?);
                let pipeline = Pipeline::new(orchestrator, analyzer);
                let enriched = self.runtime.block_on(pipeline.run_plan(
                    plan,
                    &backend,
                    progress_callback(*quiet),
                ))?;
                let summary = format!(
                    "{} panels: {} succeeded, {} failed",
                    enriched.panels.len(),
                    enriched.succeeded_count,
                    enriched.failed_count
                );
                emit(&enriched, output.as_deref(), summary)
            }
        }
    }

    fn handle_validate(&self) -> Result<String, ApiError> {
        match self.config.validate() {
            Ok(()) => Ok(format!(
                "Configuration OK ({} backend(s) configured)",
                self.config.backends.len()
            )),
            Err(errors) => Err(validation_failure(&errors)),
        }
    }

    fn validated_config(&self) -> Result<&PanelgenConfig, ApiError> {
        self.config
            .validate()
            .map_err(|errors| validation_failure(&errors))?;
        Ok(&self.config)
    }

    fn artifact_store(&self) -> Result<Arc<ArtifactStore>, ApiError> {
        let dir = self.config.storage.resolve_artifact_dir();
        let dir = if dir.is_relative() {
            self.workspace_root.join(dir)
        } else {
            dir
        };
        Ok(Arc::new(ArtifactStore::new(dir)?))
    }

    fn build_orchestrator(&self) -> Result<BatchOrchestrator, ApiError> {
        let config = self.validated_config()?;
        let store = self.artifact_store()?;
        let orchestrator = BatchOrchestrator::from_config(config, store)?;
        info!(backends = orchestrator.backends().len(), "Orchestrator ready");
        Ok(orchestrator)
    }

    fn build_analyzer(&self) -> Result<PlacementAnalyzer, ApiError> {
        let config = self.validated_config()?;
        let vision: Option<Arc<dyn VisionBackend>> = match &config.vision {
            Some(vision) => OpenAiVisionClient::from_config(vision)?
                .map(|client| Arc::new(client) as Arc<dyn VisionBackend>),
            None => None,
        };
        if vision.is_none() {
            info!("No vision backend configured, placements use the corner layout");
        }
        Ok(PlacementAnalyzer::new(
            vision,
            self.artifact_store()?,
            config.placement.clone(),
        ))
    }

    fn pick_backend(
        &self,
        orchestrator: &BatchOrchestrator,
        requested: Option<&str>,
    ) -> Result<String, ApiError> {
        match requested {
            Some(name) => Ok(name.to_string()),
            None => Ok(orchestrator.default_backend()?.to_string()),
        }
    }
}

fn validation_failure(errors: &[crate::config::ValidationError]) -> ApiError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ApiError::ConfigError(format!(
        "Configuration validation failed:\n{}",
        messages.join("\n")
    ))
}

fn progress_callback(quiet: bool) -> Option<ProgressCallback> {
    if quiet {
        return None;
    }
    Some(Arc::new(|event: &BatchProgress| -> Result<(), String> {
        eprintln!("{}", format_progress_line(event));
        Ok(())
    }))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ApiError> {
    let raw = std::fs::read_to_string(path).map_err(StorageError::from)?;
    serde_json::from_str(&raw)
        .map_err(|e| ApiError::InvalidInput(format!("{}: {}", path.display(), e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::InvalidInput(format!("Failed to serialize output: {}", e)))
}

/// Write `value` to `output` (returning `summary`) or return it as JSON.
fn emit<T: Serialize>(value: &T, output: Option<&Path>, summary: String) -> Result<String, ApiError> {
    let rendered = to_json(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(StorageError::from)?;
            Ok(format!("{} (written to {})", summary, path.display()))
        }
        None => Ok(rendered),
    }
}
