//! Backend construction from configuration.

use super::gemini::GeminiBackend;
use super::profile::{default_api_key_env, BackendConfig};
use super::replicate::ReplicateBackend;
use super::BackendAdapter;
use crate::artifact::ArtifactStore;
use crate::error::ApiError;
use crate::types::BackendKind;
use std::sync::Arc;

/// Factory for creating backend adapters
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        kind: BackendKind,
        config: &BackendConfig,
        store: Arc<ArtifactStore>,
    ) -> Result<BackendAdapter, ApiError> {
        config
            .validate()
            .map_err(|e| ApiError::ConfigError(format!("Backend '{}': {}", kind, e)))?;

        let api_key = config.resolve_api_key(kind).ok_or_else(|| {
            ApiError::BackendNotConfigured(format!(
                "{} has no API key (set api_key or {})",
                kind,
                config
                    .api_key_env
                    .as_deref()
                    .unwrap_or_else(|| default_api_key_env(kind))
            ))
        })?;

        let adapter = match kind {
            BackendKind::Gemini => BackendAdapter::Sync(Arc::new(GeminiBackend::new(
                config.model.clone(),
                api_key,
                config.endpoint.clone(),
                config.request_timeout(),
                store,
            )?)),
            BackendKind::Replicate => BackendAdapter::Async(Arc::new(ReplicateBackend::new(
                config.model.clone(),
                api_key,
                config.endpoint.clone(),
                config.request_timeout(),
                store,
            )?)),
        };
        Ok(adapter)
    }
}
