//! Paced-sequential batches end to end through the orchestrator.

use super::support::{jobs, ScriptedSyncBackend};
use panelgen::backend::{BackendAdapter, BackendConfig};
use panelgen::error::BackendError;
use panelgen::orchestrator::{BatchOrchestrator, OrchestratorConfig};
use panelgen::progress::{BatchProgress, ProgressCallback};
use panelgen::types::BackendKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn paced_config(pacing_ms: u64) -> BackendConfig {
    BackendConfig {
        pacing_delay_ms: Some(pacing_ms),
        ..Default::default()
    }
}

fn orchestrator_with(backend: Arc<ScriptedSyncBackend>, config: &BackendConfig) -> BatchOrchestrator {
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(backend), config);
    orchestrator
}

#[tokio::test(start_paused = true)]
async fn retried_job_costs_two_backoffs_and_two_pacing_delays() {
    let backend = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Gemini, Duration::from_secs(1)).fail_with(
            "p2",
            vec![
                BackendError::Transient("upstream 503".to_string()),
                BackendError::Transient("upstream 503".to_string()),
            ],
        ),
    );
    let orchestrator = orchestrator_with(Arc::clone(&backend), &paced_config(10_000));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["p1", "p2", "p3"]), "gemini", None)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.succeeded_count, 3);
    assert_eq!(result.failed_count, 0);
    assert_eq!(result.get("p2").unwrap().attempts, 3);

    // 5 calls of 1s, backoffs of 2s and 4s, two 10s pacing gaps
    assert_eq!(elapsed, Duration::from_secs(5 + 2 + 4 + 20));

    let p2 = backend.calls_for("p2");
    assert_eq!(p2.len(), 3);
    assert_eq!(p2[1].started - p2[0].finished, Duration::from_secs(2));
    assert_eq!(p2[2].started - p2[1].finished, Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn no_delay_after_last_job_and_spacing_between_successes() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_millis(500),
    ));
    let orchestrator = orchestrator_with(Arc::clone(&backend), &paced_config(6_000));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["a", "b", "c", "d"]), "gemini", None)
        .await
        .unwrap();

    assert_eq!(result.succeeded_count, 4);
    assert_eq!(started.elapsed(), Duration::from_millis(4 * 500 + 3 * 6_000));

    let calls = backend.calls();
    for pair in calls.windows(2) {
        assert!(pair[1].started - pair[0].finished >= Duration::from_secs(6));
    }
    assert_eq!(backend.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_job_does_not_reset_the_pacing_clock() {
    let backend = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Gemini, Duration::from_secs(1))
            .fail_with("bad", vec![BackendError::Validation("unsafe prompt".to_string())]),
    );
    let orchestrator = orchestrator_with(Arc::clone(&backend), &paced_config(10_000));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["ok1", "bad", "ok2"]), "gemini", None)
        .await
        .unwrap();

    assert_eq!(result.succeeded_count, 2);
    let bad = result.get("bad").unwrap();
    assert!(!bad.succeeded);
    assert_eq!(bad.attempts, 1);
    assert!(bad.error_detail.as_deref().unwrap().contains("unsafe prompt"));

    // ok1 ends at 1s, bad runs 11s..12s, ok2 is still measured from ok1: starts at 12s
    assert_eq!(started.elapsed(), Duration::from_secs(13));
}

#[tokio::test(start_paused = true)]
async fn pacing_carries_across_batches_on_the_same_backend() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_secs(1),
    ));
    let orchestrator = orchestrator_with(Arc::clone(&backend), &paced_config(10_000));

    orchestrator
        .run_batch(jobs(&["first"]), "gemini", None)
        .await
        .unwrap();
    let between = Instant::now();
    orchestrator
        .run_batch(jobs(&["second"]), "gemini", None)
        .await
        .unwrap();

    assert_eq!(between.elapsed(), Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn results_cover_every_job_and_progress_counts_up() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_millis(10),
    ));
    let orchestrator = orchestrator_with(Arc::clone(&backend), &paced_config(100));

    let events: Arc<Mutex<Vec<BatchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback = Arc::new(move |event: &BatchProgress| -> Result<(), String> {
        sink.lock().unwrap().push(event.clone());
        Err("progress sink is read-only".to_string())
    });

    let ids = ["j1", "j2", "j3", "j4", "j5"];
    let result = orchestrator
        .run_batch(jobs(&ids), "gemini", Some(callback))
        .await
        .unwrap();

    let returned: Vec<&str> = result.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(returned, ids);

    let events = events.lock().unwrap();
    let completed: Vec<usize> = events.iter().map(|e| e.completed).collect();
    assert_eq!(completed, vec![1, 2, 3, 4, 5]);
    assert!(events.iter().all(|e| e.total == 5));
}

#[tokio::test(start_paused = true)]
async fn pacing_wait_never_outlasts_the_batch_deadline() {
    let backend = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_secs(1),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig {
        batch_deadline_secs: Some(5),
        ..Default::default()
    });
    orchestrator.register(BackendAdapter::Sync(backend.clone()), &paced_config(60_000));

    let started = Instant::now();
    let result = orchestrator
        .run_batch(jobs(&["a", "b"]), "gemini", None)
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert!(result.get("a").unwrap().succeeded);
    let b = result.get("b").unwrap();
    assert!(!b.succeeded);
    assert_eq!(b.attempts, 0);
    assert!(b.error_detail.as_deref().unwrap().contains("deadline"));
    assert_eq!(backend.calls_for("b").len(), 0);
}
