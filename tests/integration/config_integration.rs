//! Configuration files and environment overrides flowing into a live orchestrator.

use panelgen::artifact::ArtifactStore;
use panelgen::config::{ConfigLoader, ValidationError};
use panelgen::error::ApiError;
use panelgen::orchestrator::BatchOrchestrator;
use panelgen::types::BackendKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// Serializes tests that set PANELGEN__* variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("panelgen.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn store(dir: &TempDir) -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::new(dir.path().join("artifacts")).unwrap())
}

#[tokio::test]
async fn configured_backends_get_their_strategies() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[orchestrator]
default_backend = "replicate"

[backends.gemini]
api_key = "g-key"
pacing_delay_ms = 12000

[backends.replicate]
api_key = "r8-key"
max_concurrency = 3
"#,
    );

    let config = ConfigLoader::load_from_file(&path).unwrap();
    config.validate().unwrap();
    let orchestrator = BatchOrchestrator::from_config(&config, store(&dir)).unwrap();

    assert_eq!(
        orchestrator.backends(),
        vec![BackendKind::Gemini, BackendKind::Replicate]
    );
    assert_eq!(orchestrator.default_backend().unwrap(), BackendKind::Replicate);
    assert_eq!(
        orchestrator.describe_backend(BackendKind::Gemini).await.as_deref(),
        Some("paced-sequential (12000 ms) [sync]")
    );
    assert_eq!(
        orchestrator.describe_backend(BackendKind::Replicate).await.as_deref(),
        Some("pooled-parallel (x3) [async]")
    );
}

#[tokio::test]
async fn environment_overrides_file_values() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[backends.gemini]
api_key = "g-key"
pacing_delay_ms = 12000
"#,
    );

    std::env::set_var("PANELGEN__BACKENDS__GEMINI__PACING_DELAY_MS", "3000");
    let loaded = ConfigLoader::load_from_file(&path);
    std::env::remove_var("PANELGEN__BACKENDS__GEMINI__PACING_DELAY_MS");

    let config = loaded.unwrap();
    assert_eq!(config.backends["gemini"].pacing_delay_ms, Some(3000));
    let orchestrator = BatchOrchestrator::from_config(&config, store(&dir)).unwrap();
    assert_eq!(
        orchestrator.describe_backend(BackendKind::Gemini).await.as_deref(),
        Some("paced-sequential (3000 ms) [sync]")
    );
}

#[test]
fn invalid_files_are_reported_before_anything_is_built() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[orchestrator]
reference_fallback_backend = "replicate"

[backends.gemini]
api_key = "g-key"
max_concurrency = 0
endpoint = "ftp://example.test"
"#,
    );

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::Backend(name, _) if name == "gemini")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::Orchestrator(msg) if msg.contains("replicate"))));
}

#[test]
fn missing_file_is_a_config_error() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        ConfigLoader::load_from_file(&missing),
        Err(ApiError::ConfigError(_))
    ));
}

#[tokio::test]
async fn backend_without_key_is_skipped_and_others_still_run() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[backends.gemini]
api_key = "g-key"

[backends.replicate]
api_key_env = "PANELGEN_TEST_UNSET_REPLICATE_KEY"
"#,
    );
    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert!(config.validate().is_ok());

    let orchestrator = BatchOrchestrator::from_config(&config, store(&dir)).unwrap();
    assert_eq!(orchestrator.backends(), vec![BackendKind::Gemini]);
    assert!(orchestrator.describe_backend(BackendKind::Replicate).await.is_none());
    assert!(matches!(
        orchestrator.resolve_backend("replicate"),
        Err(ApiError::BackendNotConfigured(_))
    ));
    assert!(format!("{:?}", orchestrator).contains("Gemini"));
}

#[test]
fn invalid_backend_settings_still_fail_the_build() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[backends.gemini]
api_key = "g-key"
max_attempts = 0
"#,
    );
    let config = ConfigLoader::load_from_file(&path).unwrap();
    let err = BatchOrchestrator::from_config(&config, store(&dir)).unwrap_err();
    assert!(matches!(err, ApiError::ConfigError(_)));
}
