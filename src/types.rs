//! Core data model: jobs, results, poll states, text blocks and placements.

use crate::error::{ApiError, BackendError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque location of a produced artifact (local path or URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frame aspect ratio, written as `"W:H"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    pub fn new(width: u32, height: u32) -> Result<Self, String> {
        if width == 0 || height == 0 {
            return Err(format!(
                "Aspect ratio components must be positive, got {}:{}",
                width, height
            ));
        }
        Ok(Self { width, height })
    }

    /// Width divided by height.
    pub fn ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Invalid aspect ratio '{}' (expected W:H)", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid aspect ratio width in '{}'", s))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid aspect ratio height in '{}'", s))?;
        AspectRatio::new(width, height)
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// One unit of rendering work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_artifact: Option<ArtifactRef>,
}

impl Job {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            aspect_ratio: AspectRatio::default(),
            seed: None,
            reference_artifact: None,
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_reference(mut self, reference: Option<ArtifactRef>) -> Self {
        self.reference_artifact = reference;
        self
    }

    /// Structural checks shared by every backend.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.id.trim().is_empty() {
            return Err(BackendError::Validation("Job id cannot be empty".to_string()));
        }
        if self.prompt.trim().is_empty() {
            return Err(BackendError::Validation(format!(
                "Job '{}' has an empty prompt",
                self.id
            )));
        }
        Ok(())
    }

    /// BLAKE3 digest of the job's content fields.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.prompt.as_bytes());
        hasher.update(b"\n");
        if let Some(negative) = &self.negative_prompt {
            hasher.update(negative.as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(self.aspect_ratio.to_string().as_bytes());
        if let Some(seed) = self.seed {
            hasher.update(&seed.to_be_bytes());
        }
        *hasher.finalize().as_bytes()
    }
}

/// Terminal outcome for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub artifact_ref: Option<ArtifactRef>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub attempts: u32,
}

impl JobResult {
    pub fn success(id: impl Into<String>, artifact_ref: ArtifactRef, attempts: u32) -> Self {
        Self {
            id: id.into(),
            artifact_ref: Some(artifact_ref),
            succeeded: true,
            error_detail: None,
            attempts,
        }
    }

    pub fn failure(id: impl Into<String>, error_detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: id.into(),
            artifact_ref: None,
            succeeded: false,
            error_detail: Some(error_detail.into()),
            attempts,
        }
    }
}

/// Backend families the orchestrator knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Synchronous image generation behind a low requests-per-minute ceiling.
    Gemini,
    /// Queued prediction API with its own admission control.
    Replicate,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Gemini, BackendKind::Replicate];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gemini => "gemini",
            BackendKind::Replicate => "replicate",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(BackendKind::Gemini),
            "replicate" => Ok(BackendKind::Replicate),
            other => Err(ApiError::UnknownBackend(other.to_string())),
        }
    }
}

/// Remote job state as reported by an asynchronous backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed | PollState::Failed | PollState::Cancelled | PollState::TimedOut
        )
    }

    fn rank(&self) -> u8 {
        match self {
            PollState::Queued => 0,
            PollState::Running => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the state machine monotonic.
    pub fn can_transition_to(&self, next: PollState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Queued => "queued",
            PollState::Running => "running",
            PollState::Completed => "completed",
            PollState::Failed => "failed",
            PollState::Cancelled => "cancelled",
            PollState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Handle for a job accepted by an asynchronous backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncJobHandle {
    pub remote_id: String,
    pub backend: BackendKind,
    pub submitted_at: DateTime<Utc>,
}

impl AsyncJobHandle {
    pub fn new(remote_id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            remote_id: remote_id.into(),
            backend,
            submitted_at: Utc::now(),
        }
    }
}

/// Kind of text overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Dialogue,
    Narrative,
    Effect,
}

/// Text to overlay on an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: String,
    pub kind: TextKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl TextBlock {
    pub fn new(id: impl Into<String>, kind: TextKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            speaker: None,
        }
    }
}

/// Direction a bubble tail points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailDirection {
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl FromStr for TailDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "" | "none" => Ok(TailDirection::None),
            "top" => Ok(TailDirection::Top),
            "bottom" => Ok(TailDirection::Bottom),
            "left" => Ok(TailDirection::Left),
            "right" => Ok(TailDirection::Right),
            "topleft" => Ok(TailDirection::TopLeft),
            "topright" => Ok(TailDirection::TopRight),
            "bottomleft" => Ok(TailDirection::BottomLeft),
            "bottomright" => Ok(TailDirection::BottomRight),
            _ => Err(format!("Unknown tail direction: {}", s)),
        }
    }
}

/// Width and height in percent of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Position and size of a text overlay, in percent of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub tail_direction: TailDirection,
}
