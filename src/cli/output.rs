//! CLI output: error mapping and plain-text formatting.

use crate::error::ApiError;
use crate::progress::BatchProgress;
use crate::types::{AspectRatio, BackendKind, Size, TextKind};

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::BackendNotConfigured(name) => format!(
            "{}\nAdd a [backends.{}] table to config/config.toml or set its API key.",
            e, name
        ),
        _ => e.to_string(),
    }
}

pub fn format_backends_text(backends: &[(BackendKind, String)]) -> String {
    if backends.is_empty() {
        return "No backends configured.".to_string();
    }
    let width = backends
        .iter()
        .map(|(kind, _)| kind.as_str().len())
        .max()
        .unwrap_or(0);
    backends
        .iter()
        .map(|(kind, strategy)| format!("{:width$}  {}", kind.as_str(), strategy, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_estimate_text(kind: TextKind, aspect: AspectRatio, size: Size) -> String {
    format!(
        "{:?} on {}: {:.1}% x {:.1}%",
        kind, aspect, size.width, size.height
    )
}

/// One stderr line per finished job.
pub fn format_progress_line(event: &BatchProgress) -> String {
    format!("[{}] {}", event.backend, event.message)
}
