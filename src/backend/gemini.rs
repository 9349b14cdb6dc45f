//! Gemini image generation (synchronous `generateContent`).

use super::http::{build_http_client, check_response, map_http_error};
use super::{check_aspect_ratio, SyncBackend};
use crate::artifact::{extension_for_mime, mime_for_path, ArtifactStore};
use crate::error::{ApiError, BackendError};
use crate::types::{ArtifactRef, BackendKind, Job};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

/// Finish reasons meaning the request itself will never produce an image.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
    "RECITATION",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Decoded image from a response.
#[derive(Debug, PartialEq)]
struct InlineImage {
    mime_type: String,
    bytes: Vec<u8>,
}

pub struct GeminiBackend {
    client: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
    store: Arc<ArtifactStore>,
}

impl GeminiBackend {
    pub fn new(
        model: Option<String>,
        api_key: String,
        endpoint: Option<String>,
        request_timeout: Duration,
        store: Arc<ArtifactStore>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(request_timeout)?,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            store,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn reference_part(&self, reference: &ArtifactRef) -> Result<Part, BackendError> {
        let bytes = self.store.load(reference).await?;
        Ok(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_for_path(reference.as_str()).to_string(),
                data: BASE64_STANDARD.encode(bytes),
            }),
        })
    }
}

fn build_request(job: &Job, reference: Option<Part>) -> GenerateContentRequest {
    let mut text = job.prompt.clone();
    if let Some(negative) = job.negative_prompt.as_deref().filter(|n| !n.trim().is_empty()) {
        text.push_str("\n\nAvoid: ");
        text.push_str(negative);
    }

    let mut parts = Vec::with_capacity(2);
    if let Some(reference) = reference {
        parts.push(Part {
            text: Some("Keep the character consistent with this reference image.".to_string()),
            inline_data: None,
        });
        parts.push(reference);
    }
    parts.push(Part {
        text: Some(text),
        inline_data: None,
    });

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE".to_string()],
            seed: job.seed,
            image_config: ImageConfig {
                aspect_ratio: job.aspect_ratio.to_string(),
            },
        },
    }
}

fn extract_image(response: GenerateContentResponse) -> Result<InlineImage, BackendError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(BackendError::Unrecoverable(format!("Prompt blocked: {}", reason)));
    }

    let mut finish_reason = None;
    for candidate in response.candidates {
        if finish_reason.is_none() {
            finish_reason = candidate.finish_reason.clone();
        }
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(inline) = part.inline_data {
                let bytes = BASE64_STANDARD.decode(inline.data.as_bytes()).map_err(|e| {
                    BackendError::Unknown(format!("Invalid base64 image data: {}", e))
                })?;
                return Ok(InlineImage {
                    mime_type: inline.mime_type,
                    bytes,
                });
            }
        }
    }

    match finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => Err(
            BackendError::Unrecoverable(format!("Generation stopped: {}", reason)),
        ),
        Some(reason) => Err(BackendError::Unknown(format!(
            "Response contained no image data (finish reason {})",
            reason
        ))),
        None => Err(BackendError::Unknown(
            "Response contained no image data".to_string(),
        )),
    }
}

#[async_trait]
impl SyncBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn validate(&self, job: &Job) -> Result<(), BackendError> {
        job.validate()?;
        check_aspect_ratio(BackendKind::Gemini, job, SUPPORTED_ASPECT_RATIOS)
    }

    async fn submit(&self, job: &Job) -> Result<ArtifactRef, BackendError> {
        let reference = match &job.reference_artifact {
            Some(reference) => Some(self.reference_part(reference).await?),
            None => None,
        };
        let request = build_request(job, reference);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_response(response).await?;

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unknown(format!("Failed to parse response: {}", e)))?;
        let image = extract_image(body)?;

        let artifact = self
            .store
            .write(job, &image.bytes, extension_for_mime(&image.mime_type))
            .await?;
        debug!(job_id = %job.id, artifact = %artifact, "Gemini image stored");
        Ok(artifact)
    }
}
