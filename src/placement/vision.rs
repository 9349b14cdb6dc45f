//! Vision backend: suggests overlay positions for an artifact.
//!
//! The concrete client speaks the OpenAI-compatible chat completions API with an
//! image part and asks for a JSON reply.

use crate::backend::http::{build_http_client, check_response, map_http_error};
use crate::error::{ApiError, BackendError};
use crate::types::{AspectRatio, Size, TextKind};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_KEY_ENV: &str = "OPENAI_API_KEY";

/// One block as described to the vision model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisionBlock {
    pub id: String,
    pub kind: TextKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub estimated: Size,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    /// Remote URL or `data:` URL of the artifact
    pub image_url: String,
    pub aspect_ratio: AspectRatio,
    pub blocks: Vec<VisionBlock>,
}

/// Position suggested for one block; sizes are optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuggestedPlacement {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default, alias = "tail_direction")]
    pub tail: Option<String>,
}

#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn suggest(&self, request: &VisionRequest)
        -> Result<Vec<SuggestedPlacement>, BackendError>;
}

/// Vision backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl VisionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid endpoint URL: {}", endpoint));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err("Model cannot be empty".to_string());
            }
        }
        Ok(())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.clone());
        }
        let var = self.api_key_env.as_deref().unwrap_or(DEFAULT_VISION_KEY_ENV);
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }
}

const SYSTEM_PROMPT: &str = "You place lettering on comic panels. Coordinates are percentages \
of the image (0-100), measured from the top-left corner. Keep text off faces and focal \
action, put dialogue near its speaker, and reply with JSON only.";

/// OpenAI-compatible vision client
pub struct OpenAiVisionClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiVisionClient {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Result<Self, ApiError> {
        Self::with_timeout(model, api_key, base_url, Duration::from_secs(60))
    }

    pub fn with_timeout(
        model: String,
        api_key: String,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(request_timeout)?,
            model,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Build a client when the configuration carries a usable key.
    pub fn from_config(config: &VisionConfig) -> Result<Option<Self>, ApiError> {
        config
            .validate()
            .map_err(|e| ApiError::ConfigError(format!("Vision: {}", e)))?;
        let Some(api_key) = config.resolve_api_key() else {
            return Ok(None);
        };
        let timeout = config
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));
        Self::with_timeout(
            config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            api_key,
            config.endpoint.clone(),
            timeout,
        )
        .map(Some)
    }
}

fn user_prompt(request: &VisionRequest) -> String {
    let blocks = serde_json::to_string(&request.blocks).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Frame aspect ratio: {}.\nText blocks with estimated sizes (percent): {}\n\
         Respond with {{\"placements\": [{{\"id\": string, \"x\": number, \"y\": number, \
         \"width\": number, \"height\": number, \"tail\": \"none|top|bottom|left|right|\
         top-left|top-right|bottom-left|bottom-right\"}}]}} with one entry per block.",
        request.aspect_ratio, blocks
    )
}

fn chat_request(model: &str, request: &VisionRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": user_prompt(request) },
                    { "type": "image_url", "image_url": { "url": request.image_url } }
                ]
            }
        ],
        "response_format": { "type": "json_object" },
        "temperature": 0.2,
        "stream": false
    })
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuggestionEnvelope {
    Wrapped { placements: Vec<SuggestedPlacement> },
    Bare(Vec<SuggestedPlacement>),
}

/// Parse the model's reply, tolerating a fenced code block around the JSON.
pub fn parse_suggestions(content: &str) -> Result<Vec<SuggestedPlacement>, BackendError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    match serde_json::from_str::<SuggestionEnvelope>(body) {
        Ok(SuggestionEnvelope::Wrapped { placements }) => Ok(placements),
        Ok(SuggestionEnvelope::Bare(placements)) => Ok(placements),
        Err(e) => Err(BackendError::Unknown(format!(
            "Vision reply is not valid placement JSON: {}",
            e
        ))),
    }
}

#[async_trait]
impl VisionBackend for OpenAiVisionClient {
    async fn suggest(
        &self,
        request: &VisionRequest,
    ) -> Result<Vec<SuggestedPlacement>, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request(&self.model, request))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_response(response).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unknown(format!("Failed to parse response: {}", e)))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Unknown("No choices in response".to_string()))?;
        parse_suggestions(&content)
    }
}
