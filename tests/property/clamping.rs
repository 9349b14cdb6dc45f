//! Property-based tests for frame clamping

use panelgen::placement::clamp_placement;
use panelgen::types::TailDirection;
use proptest::prelude::*;

fn coordinate() -> impl Strategy<Value = f64> {
    prop_oneof![
        -500.0f64..500.0,
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

/// Clamped boxes always sit inside the frame with the margin on every side
#[test]
fn test_clamped_placement_inside_frame_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(coordinate(), coordinate(), coordinate(), coordinate(), 0.0f64..20.0),
            |(x, y, width, height, margin)| {
                let p = clamp_placement(x, y, width, height, TailDirection::Bottom, margin);
                let eps = 1e-9;

                prop_assert!(p.width >= 0.0 && p.height >= 0.0);
                prop_assert!(p.x >= margin - eps, "x {} margin {}", p.x, margin);
                prop_assert!(p.y >= margin - eps, "y {} margin {}", p.y, margin);
                prop_assert!(p.x + p.width <= 100.0 - margin + eps);
                prop_assert!(p.y + p.height <= 100.0 - margin + eps);
                prop_assert_eq!(p.tail_direction, TailDirection::Bottom);
                Ok(())
            },
        )
        .unwrap();
}

/// Boxes already inside the frame are left alone
#[test]
fn test_clamp_is_identity_inside_frame_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(2.0f64..50.0, 2.0f64..50.0, 1.0f64..48.0, 1.0f64..48.0),
            |(x, y, width, height)| {
                let p = clamp_placement(x, y, width, height, TailDirection::None, 2.0);
                prop_assert_eq!((p.x, p.y, p.width, p.height), (x, y, width, height));
                Ok(())
            },
        )
        .unwrap();
}
