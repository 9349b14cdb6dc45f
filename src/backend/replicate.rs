//! Replicate predictions (asynchronous, pollable).

use super::http::{build_http_client, check_response, map_http_error};
use super::{check_aspect_ratio, AsyncBackend, PollStatus, SubmitOutcome};
use crate::artifact::ArtifactStore;
use crate::error::{ApiError, BackendError};
use crate::types::{ArtifactRef, AsyncJobHandle, BackendKind, Job, PollState};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "black-forest-labs/flux-schnell";
pub const DEFAULT_ENDPOINT: &str = "https://api.replicate.com/v1";

/// Upper bound the API accepts for `Prefer: wait=N`.
const MAX_PREFER_WAIT_SECS: u64 = 60;

const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "1:1", "16:9", "21:9", "3:2", "2:3", "4:5", "5:4", "3:4", "4:3", "9:16", "9:21",
];

#[derive(Debug, Deserialize)]
pub(crate) struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    fn state(&self) -> PollState {
        map_status(&self.status)
    }

    fn into_status(self) -> PollStatus {
        let state = self.state();
        PollStatus {
            state,
            artifact: self.output.as_ref().and_then(extract_output),
            error: self.error.as_ref().map(error_text),
        }
    }
}

pub(crate) fn map_status(status: &str) -> PollState {
    match status {
        "succeeded" => PollState::Completed,
        "failed" => PollState::Failed,
        "canceled" | "cancelled" => PollState::Cancelled,
        "processing" => PollState::Running,
        _ => PollState::Queued,
    }
}

/// First URL of a prediction's output (a string or a list of strings).
pub(crate) fn extract_output(output: &Value) -> Option<ArtifactRef> {
    match output {
        Value::String(url) if !url.is_empty() => Some(ArtifactRef::new(url.clone())),
        Value::Array(items) => items.iter().find_map(extract_output),
        _ => None,
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ReplicateBackend {
    client: reqwest::Client,
    model: String,
    api_token: String,
    endpoint: String,
    store: Arc<ArtifactStore>,
}

impl ReplicateBackend {
    pub fn new(
        model: Option<String>,
        api_token: String,
        endpoint: Option<String>,
        request_timeout: Duration,
        store: Arc<ArtifactStore>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(request_timeout)?,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_token,
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            store,
        })
    }

    async fn build_input(&self, job: &Job) -> Result<Value, BackendError> {
        let reference = match &job.reference_artifact {
            Some(reference) => Some(self.store.image_url(reference).await?),
            None => None,
        };
        Ok(prediction_input(job, reference))
    }

    async fn create_prediction(
        &self,
        job: &Job,
        wait: Option<Duration>,
    ) -> Result<Prediction, BackendError> {
        let url = format!("{}/models/{}/predictions", self.endpoint, self.model);
        let body = json!({ "input": self.build_input(job).await? });

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(wait) = wait {
            request = request.header("Prefer", prefer_wait(wait));
        }

        let response = request.send().await.map_err(map_http_error)?;
        let response = check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Unknown(format!("Failed to parse prediction: {}", e)))
    }
}

/// `Prefer` header value; never asks for longer than `wait` (whole seconds, at least 1).
pub(crate) fn prefer_wait(wait: Duration) -> String {
    format!("wait={}", wait.as_secs().clamp(1, MAX_PREFER_WAIT_SECS))
}

pub(crate) fn prediction_input(job: &Job, reference_url: Option<String>) -> Value {
    let mut input = Map::new();
    input.insert("prompt".to_string(), json!(job.prompt));
    input.insert("aspect_ratio".to_string(), json!(job.aspect_ratio.to_string()));
    if let Some(negative) = &job.negative_prompt {
        input.insert("negative_prompt".to_string(), json!(negative));
    }
    if let Some(seed) = job.seed {
        input.insert("seed".to_string(), json!(seed));
    }
    if let Some(url) = reference_url {
        input.insert("image_prompt".to_string(), json!(url));
    }
    Value::Object(input)
}

#[async_trait]
impl AsyncBackend for ReplicateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Replicate
    }

    fn validate(&self, job: &Job) -> Result<(), BackendError> {
        job.validate()?;
        check_aspect_ratio(BackendKind::Replicate, job, SUPPORTED_ASPECT_RATIOS)
    }

    async fn submit_and_wait(
        &self,
        job: &Job,
        wait: Duration,
    ) -> Result<SubmitOutcome, BackendError> {
        let prediction = self.create_prediction(job, Some(wait)).await?;
        debug!(job_id = %job.id, remote_id = %prediction.id, status = %prediction.status, "Prediction created");

        match prediction.state() {
            PollState::Completed => {
                let id = prediction.id.clone();
                prediction
                    .into_status()
                    .artifact
                    .map(SubmitOutcome::Completed)
                    .ok_or_else(|| {
                        BackendError::Unknown(format!("Prediction {} succeeded without output", id))
                    })
            }
            PollState::Failed | PollState::Cancelled | PollState::TimedOut => {
                let id = prediction.id.clone();
                let status = prediction.status.clone();
                let detail = prediction
                    .into_status()
                    .error
                    .unwrap_or_else(|| "no error detail".to_string());
                Err(BackendError::Unrecoverable(format!(
                    "Prediction {} {}: {}",
                    id, status, detail
                )))
            }
            PollState::Queued | PollState::Running => Ok(SubmitOutcome::Pending(
                AsyncJobHandle::new(prediction.id, BackendKind::Replicate),
            )),
        }
    }

    async fn submit(&self, job: &Job) -> Result<AsyncJobHandle, BackendError> {
        let prediction = self.create_prediction(job, None).await?;
        Ok(AsyncJobHandle::new(prediction.id, BackendKind::Replicate))
    }

    async fn poll(&self, handle: &AsyncJobHandle) -> Result<PollStatus, BackendError> {
        let url = format!("{}/predictions/{}", self.endpoint, handle.remote_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_response(response).await?;
        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| BackendError::Unknown(format!("Failed to parse prediction: {}", e)))?;
        Ok(prediction.into_status())
    }
}
