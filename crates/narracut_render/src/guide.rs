//! Step-by-step guides: one still per kept segment, grabbed from the
//! finished video shortly after that segment's narration begins.

use chrono::Local;
use narracut_core::config::EngineConfig;
use narracut_core::types::{secs, ScriptSegment, TimeUs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::assemble::persist;
use crate::cancel::CancelToken;
use crate::collab::{AudioLocation, RemoteStorage, VideoRepository, VideoUpdate};
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::rebuild::infer_bucket;
use crate::workspace::Workspace;

/// A still is never taken later than this into its segment.
pub const MAX_CAPTURE_OFFSET: TimeUs = TimeUs(500_000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideStep {
    #[serde(alias = "segment_id")]
    pub segment_id: String,
    /// 1-based position among the kept segments.
    pub order: usize,
    /// Where the still was taken in the finished video.
    #[serde(with = "secs")]
    pub timestamp: TimeUs,
    #[serde(alias = "screenshot_url")]
    pub screenshot_url: String,
    pub title: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, alias = "voiceover_text")]
    pub voiceover_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guide {
    #[serde(alias = "generated_at")]
    pub generated_at: String,
    pub steps: Vec<GuideStep>,
}

/// Where the stills are published.
pub enum GuideTarget<'a> {
    /// Under `docs/` in this directory; step URLs are the file paths.
    Local(&'a Path),
    Remote {
        storage: &'a dyn RemoteStorage,
        bucket: &'a str,
        project_id: &'a str,
    },
}

/// Segment start plus a fifth of its narration, at most `MAX_CAPTURE_OFFSET`,
/// so the still shows the screen after any transition into the segment.
pub fn capture_time(segment: &ScriptSegment) -> TimeUs {
    let start = segment.start_time.unwrap_or(segment.timestamp);
    start + (segment.audio_duration_or_zero() / 5).min(MAX_CAPTURE_OFFSET)
}

pub fn screenshot_name(order: usize, segment_id: &str) -> String {
    format!("step_{order:03}_{segment_id}.jpg")
}

struct Still<'s> {
    segment: &'s ScriptSegment,
    order: usize,
    at: TimeUs,
    name: String,
    path: PathBuf,
}

pub struct GuideBuilder<'a> {
    backend: &'a dyn MediaBackend,
    storage: Option<&'a dyn RemoteStorage>,
    config: &'a EngineConfig,
    cancel: CancelToken,
}

impl<'a> GuideBuilder<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: &'a EngineConfig) -> Self {
        Self {
            backend,
            storage: None,
            config,
            cancel: CancelToken::none(),
        }
    }

    pub fn with_storage(mut self, storage: &'a dyn RemoteStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Grab one still per kept segment of `script` from `video` and publish
    /// them to `target`. Nothing is published unless every still was taken.
    pub fn build(&self, video: &Path, script: &[ScriptSegment], target: GuideTarget<'_>) -> Result<Guide> {
        let workspace = Workspace::new("guide")?;
        let (guide, _) = self.build_in(&workspace, video, script, &target)?;
        Ok(guide)
    }

    fn build_in(
        &self,
        workspace: &Workspace,
        video: &Path,
        script: &[ScriptSegment],
        target: &GuideTarget<'_>,
    ) -> Result<(Guide, Vec<String>)> {
        let info = self.backend.probe(video)?;
        let frame = TimeUs::from_seconds(1.0 / info.fps.max(1.0));
        let last_frame = (info.duration - frame).max(TimeUs::ZERO);

        let mut stills = Vec::new();
        for (i, segment) in script.iter().filter(|s| s.is_kept()).enumerate() {
            self.cancel.check()?;
            let order = i + 1;
            let at = capture_time(segment).min(last_frame);
            let name = screenshot_name(order, &segment.id);
            let path = workspace.file(&name);
            self.backend.extract_frame(video, at, &path)?;
            stills.push(Still {
                segment,
                order,
                at,
                name,
                path,
            });
        }

        let (urls, keys) = match target {
            GuideTarget::Local(dir) => (publish_local(&stills, &dir.join("docs"))?, Vec::new()),
            GuideTarget::Remote {
                storage,
                bucket,
                project_id,
            } => self.publish_remote(&stills, *storage, bucket, project_id)?,
        };

        let steps = stills
            .iter()
            .zip(urls)
            .map(|(still, url)| GuideStep {
                segment_id: still.segment.id.clone(),
                order: still.order,
                timestamp: still.at,
                screenshot_url: url,
                title: still
                    .segment
                    .ui_element
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("Step {}", still.order)),
                action: still.segment.user_action.clone().unwrap_or_default(),
                voiceover_text: still.segment.voiceover_text.clone(),
            })
            .collect::<Vec<_>>();

        info!(steps = steps.len(), "Built guide");
        Ok((
            Guide {
                generated_at: Local::now().to_rfc3339(),
                steps,
            },
            keys,
        ))
    }

    fn publish_remote(
        &self,
        stills: &[Still<'_>],
        storage: &dyn RemoteStorage,
        bucket: &str,
        project_id: &str,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut urls = Vec::new();
        let mut keys = Vec::new();
        for still in stills {
            let key = self.config.storage.docs_key(project_id, &still.name);
            match storage.upload(bucket, &still.path, &key) {
                Ok(url) => {
                    urls.push(url);
                    keys.push(key);
                }
                Err(e) => {
                    remove_objects(storage, bucket, &keys);
                    return Err(e);
                }
            }
        }
        Ok((urls, keys))
    }

    /// Build a guide for a stored, processed video and save it on the record.
    pub fn generate_guide(&self, repo: &dyn VideoRepository, video_id: &str, user_id: &str) -> Result<Guide> {
        let record = repo
            .get(video_id)?
            .ok_or_else(|| RenderError::NotFound(format!("video {video_id}")))?;
        if record.created_by != user_id {
            return Err(RenderError::Unauthorized);
        }
        let location = record
            .processed_video_url
            .as_deref()
            .and_then(AudioLocation::parse)
            .ok_or_else(|| RenderError::NotProcessed(video_id.to_string()))?;
        let storage = self
            .storage
            .ok_or_else(|| RenderError::Storage("no storage configured".into()))?;

        let project_id = record
            .project_id
            .clone()
            .unwrap_or_else(|| record.id.clone());
        let bucket = infer_bucket(&record).unwrap_or_else(|| self.config.storage.bucket.clone());

        let workspace = Workspace::new("guide")?;
        let name = location.file_name().unwrap_or_else(|| "processed.mp4".into());
        let video = location.fetch(Some(storage), &workspace.file(format!("video_{name}")))?;

        let target = GuideTarget::Remote {
            storage,
            bucket: &bucket,
            project_id: &project_id,
        };
        let (guide, keys) = self.build_in(&workspace, &video, &record.script, &target)?;

        let update = VideoUpdate {
            documentation: Some(guide.clone()),
            ..VideoUpdate::default()
        };
        if let Err(e) = repo.update(video_id, update) {
            remove_objects(storage, &bucket, &keys);
            return Err(e);
        }
        info!(video = %video_id, steps = guide.steps.len(), "Saved guide");
        Ok(guide)
    }
}

fn publish_local(stills: &[Still<'_>], docs: &Path) -> Result<Vec<String>> {
    std::fs::create_dir_all(docs)?;
    let mut urls = Vec::new();
    let mut moved = Vec::new();
    for still in stills {
        let dest = docs.join(&still.name);
        if let Err(e) = persist(&still.path, &dest) {
            for path in &moved {
                let _ = std::fs::remove_file(path);
            }
            return Err(e);
        }
        let url = std::path::absolute(&dest)?;
        urls.push(url.to_string_lossy().into_owned());
        moved.push(dest);
    }
    Ok(urls)
}

fn remove_objects(storage: &dyn RemoteStorage, bucket: &str, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete(bucket, key) {
            warn!(key = %key, error = %e, "Could not remove uploaded still");
        }
    }
}
