//! Pooled-parallel batches, deadlines and cancellation.

use super::support::{jobs, ScriptedAsyncBackend, ScriptedSyncBackend, SyncAttempt};
use panelgen::backend::{BackendAdapter, BackendConfig};
use panelgen::orchestrator::{BatchOrchestrator, OrchestratorConfig};
use panelgen::types::BackendKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn pooled(max_concurrency: usize) -> BackendConfig {
    BackendConfig {
        max_concurrency: Some(max_concurrency),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn five_jobs_run_in_two_waves_of_three_then_two() {
    let backend = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Replicate, Duration::from_secs(1))
            .with_latency_for("j1", Duration::from_secs(3))
            .with_latency_for("j3", Duration::from_secs(2)),
    );
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(backend.clone()), &pooled(3));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["j1", "j2", "j3", "j4", "j5"]), "replicate", None)
        .await
        .unwrap();

    assert_eq!(result.succeeded_count, 5);
    assert_eq!(backend.max_in_flight(), 3);
    // wave 1 is bounded by its slowest job
    assert_eq!(started.elapsed(), Duration::from_secs(4));

    for id in ["j1", "j2", "j3"] {
        assert_eq!(backend.calls_for(id)[0].started, started);
    }
    let wave_one_end = backend.calls_for("j1")[0].finished;
    for id in ["j4", "j5"] {
        assert_eq!(backend.calls_for(id)[0].started, wave_one_end);
    }

    let order: Vec<&str> = result.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["j1", "j2", "j3", "j4", "j5"]);
}

#[tokio::test(start_paused = true)]
async fn async_backend_jobs_complete_on_the_synchronous_path() {
    let backend = Arc::new(ScriptedAsyncBackend::new(SyncAttempt::Complete, vec![]));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Async(backend.clone()), &pooled(2));

    let result = orchestrator
        .run_batch(jobs(&["a", "b", "c"]), "replicate", None)
        .await
        .unwrap();

    assert_eq!(result.succeeded_count, 3);
    assert_eq!(backend.sync_count(), 3);
    assert_eq!(backend.submit_count(), 0);
    assert_eq!(backend.poll_count(), 0);
    assert_eq!(
        result.get("b").unwrap().artifact_ref.as_ref().unwrap().as_str(),
        "mem://sync/b"
    );
}

#[tokio::test(start_paused = true)]
async fn batch_deadline_fails_in_flight_and_unstarted_jobs() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Replicate,
        Duration::from_secs(3),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig {
        batch_deadline_secs: Some(5),
        ..Default::default()
    });
    orchestrator.register(BackendAdapter::Sync(backend.clone()), &pooled(1));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["first", "second", "third"]), "replicate", None)
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(result.results.len(), 3);
    assert!(result.get("first").unwrap().succeeded);

    let second = result.get("second").unwrap();
    assert!(!second.succeeded);
    assert!(second.error_detail.as_deref().unwrap().starts_with("Timed out"));

    let third = result.get("third").unwrap();
    assert!(!third.succeeded);
    assert_eq!(third.attempts, 0);
    assert_eq!(result.failed_count, 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_batch_reports_every_job_without_calling_the_backend() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Replicate,
        Duration::from_secs(1),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(backend.clone()), &pooled(3));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orchestrator
        .run_batch_with_cancel(jobs(&["x", "y"]), "replicate", None, cancel)
        .await
        .unwrap();

    assert_eq!(result.failed_count, 2);
    assert!(result.results.iter().all(|r| r.attempts == 0));
    assert!(backend.calls().is_empty());
}
