//! Shared HTTP plumbing: client construction and error classification.
//!
//! Status codes and structured error payloads are turned into [`BackendError`]
//! here and nowhere else.

use crate::error::{ApiError, BackendError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_ERROR_BODY_CHARS: usize = 500;
const MAX_HINT_SEARCH_DEPTH: usize = 6;

/// Longest wait hint honoured from a backend; larger hints are capped.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(3600);

pub fn build_http_client(request_timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Classify a transport-level reqwest failure.
pub fn map_http_error(error: reqwest::Error) -> BackendError {
    if let Some(status) = error.status() {
        classify_status(status.as_u16(), &error.to_string(), None)
    } else if error.is_timeout() {
        BackendError::Transient(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        BackendError::Transport(format!("Connection error: {}", error))
    } else if error.is_decode() {
        BackendError::Unknown(format!("Failed to decode response: {}", error))
    } else {
        BackendError::Transport(format!("HTTP error: {}", error))
    }
}

/// Pass successful responses through; turn anything else into a classified error.
pub async fn check_response(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let header_hint = retry_after_header(response.headers());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(classify_status(status.as_u16(), &body, header_hint))
}

pub fn classify_status(status: u16, body: &str, header_hint: Option<Duration>) -> BackendError {
    let detail = format!("HTTP {}: {}", status, truncate(body));
    match status {
        429 => BackendError::rate_limited(detail, header_hint.or_else(|| extract_retry_hint(body))),
        400 | 422 => BackendError::Validation(detail),
        401 | 403 => BackendError::Unrecoverable(format!("Authentication failed: {}", detail)),
        404 => BackendError::Unrecoverable(format!("Not found: {}", detail)),
        408 | 500 | 502 | 503 | 504 => BackendError::Transient(detail),
        _ => BackendError::Unknown(detail),
    }
}

/// `Retry-After` in delta-seconds form.
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(seconds)
}

/// Wait hint from a structured JSON error payload.
///
/// Recognises `retryDelay` (`"15s"`, Google RPC `RetryInfo`), `retry_after`,
/// `retryAfter` and `retry_after_seconds`, at any nesting depth.
pub fn extract_retry_hint(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    find_hint(&value, 0)
}

fn find_hint(value: &Value, depth: usize) -> Option<Duration> {
    if depth > MAX_HINT_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in ["retryDelay", "retry_after", "retryAfter", "retry_after_seconds"] {
                if let Some(hint) = map.get(key).and_then(parse_delay) {
                    return Some(hint);
                }
            }
            map.values().find_map(|v| find_hint(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_hint(v, depth + 1)),
        _ => None,
    }
}

fn parse_delay(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_f64().and_then(seconds),
        Value::String(s) => s
            .trim()
            .trim_end_matches('s')
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(seconds),
        _ => None,
    }
}

/// Non-negative seconds as a duration, capped at [`MAX_RETRY_HINT`].
fn seconds(value: f64) -> Option<Duration> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(value) {
        Ok(delay) => Some(delay.min(MAX_RETRY_HINT)),
        Err(_) => Some(MAX_RETRY_HINT),
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push_str("...");
    out
}
