//! Per-backend configuration: credentials, endpoint and runtime tuning.

use crate::concurrency::{
    ConcurrencyStrategy, StrategyPolicy, DEFAULT_MAX_CONCURRENCY, DEFAULT_PACING_DELAY,
};
use crate::poller::PollerConfig;
use crate::retry::RetryPolicy;
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::http::DEFAULT_REQUEST_TIMEOUT;

/// Backend configuration, keyed by backend name (`gemini`, `replicate`) in the
/// `[backends]` table. Unset fields fall back to the family defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model identifier (Gemini model name or Replicate `owner/name`)
    #[serde(default)]
    pub model: Option<String>,

    /// API key (inline; prefer `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// API base URL override
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Scheduling discipline override
    #[serde(default)]
    pub strategy: Option<StrategyPolicy>,

    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default)]
    pub pacing_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub backoff_base: Option<f64>,

    #[serde(default)]
    pub max_backoff_secs: Option<u64>,

    #[serde(default)]
    pub rate_limit_buffer_ms: Option<u64>,

    #[serde(default)]
    pub default_retry_after_secs: Option<u64>,

    #[serde(default)]
    pub sync_timeout_secs: Option<u64>,

    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    #[serde(default)]
    pub poll_deadline_secs: Option<u64>,

    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

pub fn default_api_key_env(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Gemini => "GEMINI_API_KEY",
        BackendKind::Replicate => "REPLICATE_API_TOKEN",
    }
}

impl BackendConfig {
    /// Validate backend configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err("Model cannot be empty".to_string());
            }
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid endpoint URL: {}", endpoint));
            }
        }
        if self.max_concurrency == Some(0) {
            return Err("max_concurrency must be at least 1".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".to_string());
        }
        if let Some(base) = self.backoff_base {
            if !base.is_finite() || base < 1.0 {
                return Err(format!("backoff_base must be >= 1.0, got {}", base));
            }
        }
        if self.poll_interval_ms == Some(0) {
            return Err("poll_interval_ms must be positive".to_string());
        }
        if let (Some(interval), Some(deadline)) = (self.poll_interval_ms, self.poll_deadline_secs) {
            if interval > deadline.saturating_mul(1000) {
                return Err("poll_interval_ms exceeds poll_deadline_secs".to_string());
            }
        }
        Ok(())
    }

    /// API key from the config or the configured (or family default) env var.
    pub fn resolve_api_key(&self, kind: BackendKind) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        let var = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| default_api_key_env(kind));
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn strategy_policy(&self, kind: BackendKind) -> StrategyPolicy {
        self.strategy
            .unwrap_or_else(|| StrategyPolicy::default_for(kind))
    }

    pub fn strategy(&self, kind: BackendKind) -> ConcurrencyStrategy {
        ConcurrencyStrategy::from_policy(
            self.strategy_policy(kind),
            self.pacing_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PACING_DELAY),
            self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base: self.backoff_base.unwrap_or(defaults.backoff_base),
            max_backoff: self
                .max_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
            rate_limit_buffer: self
                .rate_limit_buffer_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_buffer),
            default_retry_after: self
                .default_retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_retry_after),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        let defaults = PollerConfig::default();
        PollerConfig {
            sync_timeout: self
                .sync_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_timeout),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            poll_deadline: self
                .poll_deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_deadline),
            ..defaults
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}
