//! Character-consistency runs: references first, then dependent jobs.

use super::support::ScriptedSyncBackend;
use panelgen::backend::{BackendAdapter, BackendConfig};
use panelgen::error::{ApiError, BackendError};
use panelgen::orchestrator::{
    BatchOrchestrator, DependentJob, OrchestratorConfig, ReferenceRequest, Subject,
};
use panelgen::types::{BackendKind, Job};
use std::sync::Arc;
use std::time::Duration;

fn subject(id: &str, description: &str) -> Subject {
    Subject {
        id: id.to_string(),
        description: description.to_string(),
        style: None,
    }
}

fn quick() -> BackendConfig {
    BackendConfig {
        pacing_delay_ms: Some(1_000),
        max_concurrency: Some(3),
        ..Default::default()
    }
}

fn request() -> ReferenceRequest {
    ReferenceRequest {
        subjects: vec![
            subject("mira", "a tall courier with a red scarf"),
            subject("otto", "an old harbour cat"),
            subject("unused", "never appears"),
        ],
        jobs: vec![
            DependentJob::new(Job::new("p1", "Mira at the pier"), Some("mira".to_string())),
            DependentJob::new(Job::new("p2", "Empty street"), None),
            DependentJob::new(Job::new("p3", "Otto on a crate"), Some("otto".to_string())),
            DependentJob::new(Job::new("p4", "Mira meets Otto"), Some("mira".to_string())),
        ],
        backend: "gemini".to_string(),
        style: "ink wash".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn references_are_threaded_into_dependent_jobs() {
    let gemini = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_millis(200),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(gemini.clone()), &quick());

    let run = orchestrator.run_with_references(request(), None).await.unwrap();

    // only referenced subjects get a reference image
    let subjects: Vec<&str> = run.references.iter().map(|r| r.subject_id.as_str()).collect();
    assert_eq!(subjects, vec!["mira", "otto"]);
    assert!(run.references.iter().all(|r| r.artifact_ref.is_some()));

    let ref_call = &gemini.calls_for("ref:mira")[0];
    assert!(ref_call.job.prompt.contains("red scarf"));
    assert!(ref_call.job.prompt.contains("ink wash"));

    let mira_ref = run.references[0].artifact_ref.clone();
    assert_eq!(gemini.calls_for("p1")[0].job.reference_artifact, mira_ref);
    assert_eq!(gemini.calls_for("p4")[0].job.reference_artifact, mira_ref);
    assert_eq!(gemini.calls_for("p2")[0].job.reference_artifact, None);

    let ids: Vec<&str> = run.batch.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
    assert_eq!(run.batch.succeeded_count, 4);

    // every reference finished before the first dependent started
    let last_reference = gemini.calls_for("ref:otto")[0].finished;
    assert!(gemini.calls_for("p1")[0].started >= last_reference);
}

#[tokio::test(start_paused = true)]
async fn failed_reference_routes_dependents_to_the_fallback_backend() {
    let gemini = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Gemini, Duration::from_millis(200)).fail_with(
            "ref:otto",
            vec![BackendError::Unrecoverable("blocked by safety filter".to_string())],
        ),
    );
    let replicate = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Replicate,
        Duration::from_millis(200),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig {
        reference_fallback_backend: Some("replicate".to_string()),
        ..Default::default()
    });
    orchestrator.register(BackendAdapter::Sync(gemini.clone()), &quick());
    orchestrator.register(BackendAdapter::Sync(replicate.clone()), &quick());

    let run = orchestrator.run_with_references(request(), None).await.unwrap();

    let otto = run.references.iter().find(|r| r.subject_id == "otto").unwrap();
    assert!(otto.artifact_ref.is_none());
    assert!(otto.error_detail.as_deref().unwrap().contains("safety filter"));

    assert!(gemini.calls_for("p3").is_empty());
    let fallback = replicate.calls_for("p3");
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].job.reference_artifact, None);

    assert_eq!(run.batch.succeeded_count, 4);
    let ids: Vec<&str> = run.batch.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
}

#[tokio::test(start_paused = true)]
async fn unknown_subject_fails_before_any_call() {
    let gemini = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_millis(200),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(gemini.clone()), &quick());

    let mut req = request();
    req.jobs.push(DependentJob::new(
        Job::new("p5", "Who is this?"),
        Some("ghost".to_string()),
    ));
    let err = orchestrator.run_with_references(req, None).await.unwrap_err();

    assert!(matches!(err, ApiError::InvalidJob { .. }));
    assert!(gemini.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_reference_generation_returns_the_artifact() {
    let gemini = Arc::new(ScriptedSyncBackend::new(
        BackendKind::Gemini,
        Duration::from_millis(200),
    ));
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(BackendAdapter::Sync(gemini.clone()), &quick());

    let artifact = orchestrator
        .generate_reference("a lighthouse keeper", "woodcut")
        .await
        .unwrap();
    assert!(artifact.as_str().starts_with("mem://gemini/ref-"));
}
