//! Placement analysis with failing and partial vision answers.

use super::support::{suggestion, ScriptedVision};
use panelgen::artifact::ArtifactStore;
use panelgen::error::BackendError;
use panelgen::placement::{PlacementAnalyzer, PlacementConfig, PlacementSource, VisionBackend};
use panelgen::types::{ArtifactRef, AspectRatio, TailDirection, TextBlock, TextKind};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<ArtifactStore>,
    artifact: ArtifactRef,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path().join("artifacts")).unwrap());
    let path = dir.path().join("panel.png");
    std::fs::write(&path, b"\x89PNG fake").unwrap();
    let artifact = ArtifactRef::new(path.to_string_lossy().into_owned());
    Fixture {
        _dir: dir,
        store,
        artifact,
    }
}

fn blocks() -> Vec<TextBlock> {
    vec![
        TextBlock::new("b1", TextKind::Dialogue, "Did you hear that?"),
        TextBlock::new("b2", TextKind::Narrative, "Meanwhile, across the bay..."),
        TextBlock::new("b3", TextKind::Dialogue, "Stay close."),
        TextBlock::new("b4", TextKind::Effect, "CRASH"),
        TextBlock::new("b5", TextKind::Narrative, "Later."),
    ]
}

#[tokio::test(start_paused = true)]
async fn failing_vision_falls_back_to_round_robin_corners() {
    let fx = fixture();
    let vision = Arc::new(ScriptedVision::failing(BackendError::Transient(
        "vision overloaded".to_string(),
    )));
    let config = PlacementConfig::default();
    let margin = config.margin;
    let analyzer = PlacementAnalyzer::new(
        Some(vision.clone() as Arc<dyn VisionBackend>),
        Arc::clone(&fx.store),
        config,
    );

    let placements = analyzer
        .analyze_detailed(&fx.artifact, &blocks(), AspectRatio::SQUARE)
        .await;

    assert_eq!(vision.call_times().len(), 3);
    assert_eq!(placements.len(), 5);
    assert!(placements.iter().all(|p| p.source == PlacementSource::Fallback));

    let p: Vec<_> = placements.iter().map(|b| b.placement).collect();
    // top-left, top-right, bottom-left, bottom-right, top-left again
    assert_eq!((p[0].x, p[0].y), (margin, margin));
    assert_eq!(p[1].y, margin);
    assert!((p[1].x + p[1].width - (100.0 - margin)).abs() < 1e-9);
    assert_eq!(p[2].x, margin);
    assert!((p[2].y + p[2].height - (100.0 - margin)).abs() < 1e-9);
    assert!((p[3].x + p[3].width - (100.0 - margin)).abs() < 1e-9);
    assert!((p[3].y + p[3].height - (100.0 - margin)).abs() < 1e-9);
    assert_eq!((p[4].x, p[4].y), (margin, margin));

    assert_eq!(p[1].tail_direction, TailDirection::None);
    assert_eq!(p[4].tail_direction, TailDirection::None);
    assert_eq!(p[0].tail_direction, TailDirection::BottomRight);
}

#[tokio::test(start_paused = true)]
async fn missing_ids_fall_back_individually() {
    let fx = fixture();
    let vision = Arc::new(ScriptedVision::answering(vec![
        suggestion("b1", 40.0, 10.0, Some("left")),
        suggestion("b4", 120.0, 50.0, None),
        suggestion("not-a-block", 5.0, 5.0, None),
    ]));
    let analyzer = PlacementAnalyzer::new(
        Some(vision.clone() as Arc<dyn VisionBackend>),
        Arc::clone(&fx.store),
        PlacementConfig::default(),
    );

    let placements = analyzer
        .analyze_detailed(&fx.artifact, &blocks(), AspectRatio::SQUARE)
        .await;

    let sources: Vec<PlacementSource> = placements.iter().map(|p| p.source).collect();
    assert_eq!(
        sources,
        vec![
            PlacementSource::Vision,
            PlacementSource::Fallback,
            PlacementSource::Fallback,
            PlacementSource::Vision,
            PlacementSource::Fallback,
        ]
    );
    assert_eq!(placements[0].placement.x, 40.0);
    assert_eq!(placements[0].placement.tail_direction, TailDirection::Left);

    // clamped back inside the frame
    let crash = placements[3].placement;
    assert!(crash.x + crash.width <= 98.0 + 1e-9);
    assert_eq!(crash.tail_direction, TailDirection::None);
}

#[tokio::test(start_paused = true)]
async fn vision_calls_are_paced_across_artifacts() {
    let fx = fixture();
    let vision = Arc::new(ScriptedVision::answering(vec![]));
    let analyzer = Arc::new(PlacementAnalyzer::new(
        Some(vision.clone() as Arc<dyn VisionBackend>),
        Arc::clone(&fx.store),
        PlacementConfig {
            pacing_delay_ms: 2_000,
            ..Default::default()
        },
    ));

    let blocks = blocks();
    let runs = (0..3).map(|_| {
        let analyzer = Arc::clone(&analyzer);
        let artifact = fx.artifact.clone();
        let blocks = blocks.clone();
        async move {
            analyzer
                .analyze(&artifact, &blocks, AspectRatio::SQUARE)
                .await
        }
    });
    futures::future::join_all(runs).await;

    let mut times = vision.call_times();
    times.sort();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(2));
    }
}

#[tokio::test]
async fn without_vision_every_block_uses_the_corner_layout() {
    let fx = fixture();
    let analyzer = PlacementAnalyzer::new(None, Arc::clone(&fx.store), PlacementConfig::default());

    let placements = analyzer
        .analyze(&fx.artifact, &blocks(), AspectRatio::new(16, 9).unwrap())
        .await;
    assert_eq!(placements.len(), 5);
    for placement in placements {
        assert!(placement.x >= 2.0 && placement.y >= 2.0);
        assert!(placement.x + placement.width <= 98.0 + 1e-9);
        assert!(placement.y + placement.height <= 98.0 + 1e-9);
    }
}
