//! Artifact Store
//!
//! Write-once storage for rendered images. File names are derived from a BLAKE3
//! digest over the job content and a nanosecond timestamp, so concurrent writers
//! never collide and never need a lock. Loads accept local paths and `http(s)` URLs.

use crate::backend::http::{build_http_client, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{ApiError, StorageError};
use crate::types::{ArtifactRef, Job};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Artifact storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for rendered artifacts (default: `$XDG_DATA_HOME/panelgen/artifacts`)
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(ArtifactStore::default_root)
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    client: reqwest::Client,
    sequence: AtomicU64,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(StorageError::from)?;
        Ok(Self {
            root,
            client: build_http_client(DEFAULT_REQUEST_TIMEOUT)?,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn default_root() -> PathBuf {
        directories::ProjectDirs::from("", "", "panelgen")
            .map(|dirs| dirs.data_dir().join("artifacts"))
            .unwrap_or_else(|| PathBuf::from(".panelgen").join("artifacts"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash-derived file name for a new artifact of `job`.
    pub fn artifact_name(&self, job: &Job, extension: &str) -> String {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_be_bytes();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).to_be_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&job.content_hash());
        hasher.update(&nanos);
        hasher.update(&sequence);
        let digest = hasher.finalize();
        format!("{}.{}", hex::encode(&digest.as_bytes()[..16]), extension)
    }

    /// Write `bytes` as a new artifact for `job`. Existing files are never overwritten.
    pub async fn write(
        &self,
        job: &Job,
        bytes: &[u8],
        extension: &str,
    ) -> Result<ArtifactRef, StorageError> {
        let path = self.root.join(self.artifact_name(job, extension));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        write_or_remove(&path, file, bytes).await?;

        debug!(job_id = %job.id, path = %path.display(), bytes = bytes.len(), "Artifact written");
        Ok(ArtifactRef::new(path.to_string_lossy().into_owned()))
    }

    /// Read an artifact's bytes from disk or over HTTP.
    pub async fn load(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError> {
        if artifact.as_str().trim().is_empty() {
            return Err(StorageError::InvalidReference("empty reference".to_string()));
        }
        if artifact.is_remote() {
            let response = self
                .client
                .get(artifact.as_str())
                .send()
                .await
                .map_err(|e| StorageError::FetchFailed(format!("{}: {}", artifact, e)))?;
            if !response.status().is_success() {
                return Err(StorageError::FetchFailed(format!(
                    "{}: HTTP {}",
                    artifact,
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| StorageError::FetchFailed(format!("{}: {}", artifact, e)))?;
            return Ok(bytes.to_vec());
        }

        let path = Path::new(artifact.as_str());
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ArtifactNotFound(artifact.to_string()))
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    /// URL suitable for an image input: remote refs as-is, local files as data URLs.
    pub async fn image_url(&self, artifact: &ArtifactRef) -> Result<String, StorageError> {
        if artifact.is_remote() {
            return Ok(artifact.to_string());
        }
        let bytes = self.load(artifact).await?;
        Ok(format!(
            "data:{};base64,{}",
            mime_for_path(artifact.as_str()),
            BASE64_STANDARD.encode(bytes)
        ))
    }
}

/// Write `bytes` to the freshly created `path`, deleting it if the write fails.
async fn write_or_remove<W>(path: &Path, mut writer: W, bytes: &[u8]) -> Result<(), StorageError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    if let Err(err) = written {
        drop(writer);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %remove_err, "Failed to remove partial artifact");
        }
        return Err(StorageError::IoError(err));
    }
    Ok(())
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

pub fn mime_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
