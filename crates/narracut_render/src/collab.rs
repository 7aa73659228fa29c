//! Seams to the services around the engine: script generation, speech
//! synthesis, object storage and the video record store.

use narracut_core::script::GeneratedScript;
use narracut_core::types::ScriptSegment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::guide::Guide;

pub trait ScriptGenerator: Send + Sync {
    fn generate(&self, video: &Path) -> Result<GeneratedScript>;
}

/// Writes spoken audio for `text` to `output`. The engine probes the result
/// itself; any duration the service reports is ignored.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str, output: &Path) -> Result<()>;
}

pub trait RemoteStorage: Send + Sync {
    fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<PathBuf>;
    /// Returns the URL the object can be fetched from later.
    fn upload(&self, bucket: &str, local: &Path, key: &str) -> Result<String>;
    /// Removing an absent object is not an error.
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub created_by: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub script: Vec<ScriptSegment>,
    #[serde(default)]
    pub processed_audio_url: Option<String>,
    #[serde(default)]
    pub processed_video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Guide>,
}

/// Partial update; `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<ScriptSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Guide>,
}

pub trait VideoRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<VideoRecord>>;
    fn update(&self, id: &str, update: VideoUpdate) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Local storage
// ---------------------------------------------------------------------------

/// Filesystem-backed storage: objects live at `<root>/<bucket>/<key>` and the
/// returned URL is the absolute path.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl RemoteStorage for LocalStorage {
    fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<PathBuf> {
        let source = self.object_path(bucket, key);
        if !source.exists() {
            return Err(RenderError::Storage(format!("no object {bucket}/{key}")));
        }
        std::fs::copy(&source, local)?;
        Ok(local.to_path_buf())
    }

    fn upload(&self, bucket: &str, local: &Path, key: &str) -> Result<String> {
        let dest = self.object_path(bucket, key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local, &dest)?;
        let dest = std::path::absolute(&dest)?;
        Ok(dest.to_string_lossy().into_owned())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        match std::fs::remove_file(self.object_path(bucket, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Audio locations
// ---------------------------------------------------------------------------

const GCS_HOST: &str = "storage.googleapis.com";

/// Where a previously produced audio artifact can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioLocation {
    Object { bucket: String, key: String },
    Http(String),
    Local(PathBuf),
}

impl AudioLocation {
    /// `gs://bucket/key` and `https://storage.googleapis.com/bucket/key` are
    /// storage objects, other http(s) URLs are fetched directly, anything
    /// else is a local path.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        if let Some(rest) = url.strip_prefix("gs://") {
            let (bucket, key) = rest.split_once('/')?;
            return object(bucket, key);
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let after_scheme = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
            if let Some(path) = after_scheme.strip_prefix(GCS_HOST) {
                let path = path.trim_start_matches('/');
                let path = path.split(['?', '#']).next().unwrap_or(path);
                let (bucket, key) = path.split_once('/')?;
                return object(bucket, key);
            }
            return Some(Self::Http(url.to_string()));
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        Some(Self::Local(PathBuf::from(path)))
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            Self::Object { bucket, .. } => Some(bucket),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<String> {
        let name = match self {
            Self::Object { key, .. } => key.rsplit('/').next().map(str::to_string),
            Self::Http(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .map(str::to_string),
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
        };
        name.filter(|n| !n.is_empty())
    }

    /// Copy the artifact to `dest`.
    pub fn fetch(&self, storage: Option<&dyn RemoteStorage>, dest: &Path) -> Result<PathBuf> {
        match self {
            Self::Object { bucket, key } => {
                let storage = storage.ok_or_else(|| {
                    RenderError::Storage(format!("no storage configured for {bucket}/{key}"))
                })?;
                debug!(bucket = %bucket, key = %key, "Downloading from storage");
                storage.download(bucket, key, dest)
            }
            Self::Http(url) => {
                debug!(url = %url, "Fetching over HTTP");
                let response = reqwest::blocking::get(url.as_str())?.error_for_status()?;
                let bytes = response.bytes()?;
                std::fs::write(dest, &bytes)?;
                Ok(dest.to_path_buf())
            }
            Self::Local(path) => {
                if !path.exists() {
                    return Err(RenderError::FileNotFound(path.clone()));
                }
                std::fs::copy(path, dest)?;
                Ok(dest.to_path_buf())
            }
        }
    }
}

fn object(bucket: &str, key: &str) -> Option<AudioLocation> {
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some(AudioLocation::Object {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}
