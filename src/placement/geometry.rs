//! Text overlay size estimation and frame clamping.
//!
//! All values are percentages of the frame. Estimates are pure functions of text
//! length, script, kind and aspect ratio, clamped to per-kind bounds.

use crate::types::{AspectRatio, Placement, Size, TailDirection, TextKind};
use serde::{Deserialize, Serialize};

/// Width multiplier applied when the text contains Cyrillic characters.
pub const CYRILLIC_WIDTH_FACTOR: f64 = 1.08;

/// Extra height reserved under a dialogue bubble for its tail.
const DIALOGUE_TAIL_MARGIN: f64 = 3.0;

/// Aspect ratios beyond this are treated as this extreme.
const MAX_ASPECT_SKEW: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionBounds {
    pub min: f64,
    pub max: f64,
}

impl DimensionBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KindBounds {
    pub width: DimensionBounds,
    pub height: DimensionBounds,
}

/// Per-kind size bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryBounds {
    pub dialogue: KindBounds,
    pub narrative: KindBounds,
    pub effect: KindBounds,
}

impl Default for GeometryBounds {
    fn default() -> Self {
        Self {
            dialogue: KindBounds {
                width: DimensionBounds::new(12.0, 45.0),
                height: DimensionBounds::new(8.0, 40.0),
            },
            narrative: KindBounds {
                width: DimensionBounds::new(25.0, 85.0),
                height: DimensionBounds::new(6.0, 25.0),
            },
            effect: KindBounds {
                width: DimensionBounds::new(8.0, 35.0),
                height: DimensionBounds::new(6.0, 20.0),
            },
        }
    }
}

impl GeometryBounds {
    pub fn for_kind(&self, kind: TextKind) -> &KindBounds {
        match kind {
            TextKind::Dialogue => &self.dialogue,
            TextKind::Narrative => &self.narrative,
            TextKind::Effect => &self.effect,
        }
    }

    /// Every range must be positive, ordered, and leave room for both margins.
    pub fn validate(&self, margin: f64) -> Result<(), String> {
        let usable = 100.0 - 2.0 * margin;
        for (name, kind) in [
            ("dialogue", &self.dialogue),
            ("narrative", &self.narrative),
            ("effect", &self.effect),
        ] {
            for (axis, range) in [("width", kind.width), ("height", kind.height)] {
                if !(range.min > 0.0 && range.min <= range.max) {
                    return Err(format!(
                        "{} {} bounds must satisfy 0 < min <= max (got {}..{})",
                        name, axis, range.min, range.max
                    ));
                }
                if range.max > usable {
                    return Err(format!(
                        "{} {} max {} exceeds usable frame {}",
                        name, axis, range.max, usable
                    ));
                }
            }
        }
        Ok(())
    }
}

pub fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{0400}'..='\u{052F}'
            | '\u{1C80}'..='\u{1C8F}'
            | '\u{2DE0}'..='\u{2DFF}'
            | '\u{A640}'..='\u{A69F}')
    })
}

/// Estimate with the default bounds.
pub fn estimate_size(text: &str, kind: TextKind, aspect_ratio: AspectRatio) -> Size {
    estimate_size_with_bounds(text, kind, aspect_ratio, &GeometryBounds::default())
}

pub fn estimate_size_with_bounds(
    text: &str,
    kind: TextKind,
    aspect_ratio: AspectRatio,
    bounds: &GeometryBounds,
) -> Size {
    let chars = text.trim().chars().count() as f64;
    let length = if contains_cyrillic(text) {
        chars * CYRILLIC_WIDTH_FACTOR
    } else {
        chars
    };

    let (width, height) = match kind {
        // Short bursts: wide relative to their height.
        TextKind::Effect => (8.0 + 1.6 * length, 6.0 + 0.25 * length),
        // Caption strips across the frame.
        TextKind::Narrative => (25.0 + 0.45 * length, 6.0 + 0.12 * length),
        // Bubbles grow in both directions.
        TextKind::Dialogue => {
            let s = length.sqrt();
            (10.0 + 3.2 * s, 6.0 + 2.6 * s + DIALOGUE_TAIL_MARGIN)
        }
    };

    let skew = aspect_ratio
        .ratio()
        .clamp(1.0 / MAX_ASPECT_SKEW, MAX_ASPECT_SKEW)
        .sqrt();
    let range = bounds.for_kind(kind);
    Size {
        width: range.width.clamp(width / skew),
        height: range.height.clamp(height * skew),
    }
}

/// Shrink and shift a box until it sits inside the frame with `margin` on every side.
pub fn clamp_placement(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    tail_direction: TailDirection,
    margin: f64,
) -> Placement {
    let usable = (100.0 - 2.0 * margin).max(0.0);
    let width = finite_or_zero(width).max(0.0).min(usable);
    let height = finite_or_zero(height).max(0.0).min(usable);
    let x = finite_or_zero(x).max(margin).min(100.0 - margin - width);
    let y = finite_or_zero(y).max(margin).min(100.0 - margin - height);
    Placement {
        x,
        y,
        width,
        height,
        tail_direction,
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
