//! Plan pipeline: rendering plus placement for every successful panel.

use super::support::{suggestion, ScriptedSyncBackend, ScriptedVision};
use panelgen::artifact::ArtifactStore;
use panelgen::backend::{BackendAdapter, BackendConfig};
use panelgen::error::BackendError;
use panelgen::orchestrator::{BatchOrchestrator, OrchestratorConfig};
use panelgen::pipeline::{PanelPlan, Pipeline};
use panelgen::placement::{PlacementAnalyzer, PlacementConfig, PlacementSource, VisionBackend};
use panelgen::types::BackendKind;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PLAN: &str = r#"{
  "title": "Harbour Night",
  "style": "ink wash",
  "subjects": [
    { "id": "mira", "description": "a courier with a red scarf" }
  ],
  "panels": [
    {
      "id": "p1",
      "prompt": "Mira runs along the pier",
      "aspect_ratio": "16:9",
      "subject_id": "mira",
      "text_blocks": [
        { "id": "t1", "kind": "dialogue", "text": "Wait for me!", "speaker": "mira" },
        { "id": "t2", "kind": "narrative", "text": "The last ferry was leaving." }
      ]
    },
    {
      "id": "p2",
      "prompt": "The ferry pulls away",
      "text_blocks": [
        { "id": "t3", "kind": "effect", "text": "HOOONK" }
      ]
    },
    {
      "id": "p3",
      "prompt": "Close-up of a dropped letter",
      "text_blocks": []
    }
  ]
}"#;

fn pipeline(backend: Arc<ScriptedSyncBackend>, vision: Arc<ScriptedVision>) -> (TempDir, Pipeline) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());
    let mut orchestrator = BatchOrchestrator::new(OrchestratorConfig::default());
    orchestrator.register(
        BackendAdapter::Sync(backend),
        &BackendConfig {
            pacing_delay_ms: Some(500),
            ..Default::default()
        },
    );
    let analyzer = PlacementAnalyzer::new(
        Some(vision as Arc<dyn VisionBackend>),
        store,
        PlacementConfig {
            pacing_delay_ms: 0,
            ..Default::default()
        },
    );
    (dir, Pipeline::new(Arc::new(orchestrator), Arc::new(analyzer)))
}

#[tokio::test(start_paused = true)]
async fn plan_panels_are_rendered_and_enriched() {
    // remote refs go to the vision backend as-is, so nothing is fetched
    let backend = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Gemini, Duration::from_millis(300))
            .serving_from("https://cdn.example.test"),
    );
    let vision = Arc::new(ScriptedVision::answering(vec![
        suggestion("t1", 10.0, 12.0, Some("bottom-left")),
        suggestion("t3", 50.0, 50.0, None),
    ]));
    let (_dir, pipeline) = pipeline(backend.clone(), vision.clone());

    let plan: PanelPlan = serde_json::from_str(PLAN).unwrap();
    let enriched = pipeline.run_plan(plan, "gemini", None).await.unwrap();

    assert_eq!(enriched.title.as_deref(), Some("Harbour Night"));
    assert_eq!(enriched.references.len(), 1);
    assert_eq!(enriched.succeeded_count, 3);

    let ids: Vec<&str> = enriched.panels.iter().map(|p| p.spec.job.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);

    let p1 = &enriched.panels[0];
    assert_eq!(p1.placements.len(), 2);
    assert_eq!(p1.placements[0].source, PlacementSource::Vision);
    assert_eq!(p1.placements[1].source, PlacementSource::Fallback);

    // panels without text are not sent for analysis
    assert!(enriched.panels[2].placements.is_empty());
    assert_eq!(vision.call_times().len(), 2);

    // the subject reference reached the dependent panel
    assert!(backend.calls_for("p1")[0].job.reference_artifact.is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_panels_carry_errors_and_skip_placement() {
    let backend = Arc::new(
        ScriptedSyncBackend::new(BackendKind::Gemini, Duration::from_millis(300))
            .serving_from("https://cdn.example.test")
            .fail_with(
                "p2",
                vec![BackendError::Validation("prompt rejected".to_string())],
            ),
    );
    let vision = Arc::new(ScriptedVision::answering(vec![]));
    let (_dir, pipeline) = pipeline(backend, vision.clone());

    let mut plan: PanelPlan = serde_json::from_str(PLAN).unwrap();
    for panel in &mut plan.panels {
        panel.subject_id = None;
    }
    let enriched = pipeline.run_plan(plan, "gemini", None).await.unwrap();

    assert!(enriched.references.is_empty());
    assert_eq!(enriched.failed_count, 1);
    let p2 = &enriched.panels[1];
    assert!(!p2.succeeded);
    assert!(p2.placements.is_empty());
    assert!(p2.error_detail.as_deref().unwrap().contains("prompt rejected"));
    assert_eq!(vision.call_times().len(), 1);
}
