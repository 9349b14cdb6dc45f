//! Property-based tests for size estimation

use panelgen::placement::{estimate_size, GeometryBounds};
use panelgen::types::{AspectRatio, TextKind};
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = TextKind> {
    prop_oneof![
        Just(TextKind::Dialogue),
        Just(TextKind::Narrative),
        Just(TextKind::Effect),
    ]
}

fn aspect_strategy() -> impl Strategy<Value = AspectRatio> {
    (1u32..=32, 1u32..=32).prop_map(|(w, h)| AspectRatio::new(w, h).unwrap())
}

/// Estimates always land inside the bounds for their kind
#[test]
fn test_estimate_within_kind_bounds_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let bounds = GeometryBounds::default();

    runner
        .run(
            &(any::<String>(), kind_strategy(), aspect_strategy()),
            |(text, kind, aspect)| {
                let size = estimate_size(&text, kind, aspect);
                let range = bounds.for_kind(kind);

                prop_assert!(range.width.contains(size.width), "width {}", size.width);
                prop_assert!(range.height.contains(size.height), "height {}", size.height);
                Ok(())
            },
        )
        .unwrap();
}

/// More text never produces a smaller box
#[test]
fn test_estimate_monotonic_in_length_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &("[a-zA-Z ,.!?]{1,80}", kind_strategy(), aspect_strategy()),
            |(text, kind, aspect)| {
                let short = estimate_size(&text, kind, aspect);
                let long = estimate_size(&format!("{}{}", text, text), kind, aspect);

                prop_assert!(long.width >= short.width);
                prop_assert!(long.height >= short.height);
                Ok(())
            },
        )
        .unwrap();
}

/// Same input, same estimate
#[test]
fn test_estimate_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(any::<String>(), kind_strategy(), aspect_strategy()),
            |(text, kind, aspect)| {
                prop_assert_eq!(
                    estimate_size(&text, kind, aspect),
                    estimate_size(&text, kind, aspect)
                );
                Ok(())
            },
        )
        .unwrap();
}
