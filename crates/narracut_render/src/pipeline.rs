//! End-to-end narration: script generation, synthesis, timeline resolution,
//! assembly, master audio and publication of the results.

use chrono::Local;
use narracut_core::captions::attach_word_spans;
use narracut_core::config::EngineConfig;
use narracut_core::script::{assign_missing_ids, new_project_id, ScriptDocument};
use narracut_core::timeline::{
    compute_narration_timeline, durations_by_segment, narration_duration, resolve_timeline,
    validate_narration_timeline, Collision,
};
use narracut_core::types::{secs, AudioAsset, ScriptSegment, TimeUs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assemble::{persist, AssemblyProgress, Assembler, Pacing};
use crate::audio::{placed_layout, write_master};
use crate::cancel::CancelToken;
use crate::collab::{RemoteStorage, ScriptGenerator, Synthesizer};
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::workspace::Workspace;

pub const DOCUMENT_FILE: &str = "ai_voiceover_script.json";
pub const VIDEO_FILE: &str = "final_video.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetadata {
    #[serde(with = "secs")]
    pub duration: TimeUs,
    #[serde(with = "secs")]
    pub narration_duration: TimeUs,
    /// The video runs on after the narration has ended.
    pub has_silent_tail: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub document: ScriptDocument,
    pub document_path: PathBuf,
    pub video_url: String,
    pub master_url: String,
    pub metadata: PipelineMetadata,
    pub collisions: Vec<Collision>,
}

pub struct NarrationPipeline<'a> {
    backend: &'a dyn MediaBackend,
    generator: &'a dyn ScriptGenerator,
    synthesizer: &'a dyn Synthesizer,
    storage: Option<&'a dyn RemoteStorage>,
    config: &'a EngineConfig,
    cancel: CancelToken,
    progress: Option<watch::Sender<AssemblyProgress>>,
}

impl<'a> NarrationPipeline<'a> {
    pub fn new(
        backend: &'a dyn MediaBackend,
        generator: &'a dyn ScriptGenerator,
        synthesizer: &'a dyn Synthesizer,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            backend,
            generator,
            synthesizer,
            storage: None,
            config,
            cancel: CancelToken::none(),
            progress: None,
        }
    }

    /// Upload results instead of copying them into the output directory.
    pub fn with_storage(mut self, storage: &'a dyn RemoteStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: watch::Sender<AssemblyProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn run(mut self, video: &Path, output_dir: &Path) -> Result<PipelineOutput> {
        if !video.exists() {
            return Err(RenderError::FileNotFound(video.to_path_buf()));
        }
        let now = Local::now();
        let project_id = new_project_id(video, now);
        info!(project = %project_id, video = %video.display(), "Starting narration pipeline");

        self.cancel.check()?;
        let generated = self.generator.generate(video)?;
        let segments = assign_missing_ids(&generated.script_timeline);
        let cleanup: Vec<_> = generated.cleanup_segments.iter().map(|c| c.range()).collect();

        let workspace = Workspace::new("narrate")?;
        let voiceovers = workspace.subdir("voiceovers")?;

        // synthesis
        let mut raw = Vec::new();
        for (idx, segment) in segments.iter().enumerate().filter(|(_, s)| s.is_kept()) {
            self.cancel.check()?;
            let path = voiceovers.join(format!("narration_{:02}_{}.mp3", idx + 1, segment.id));
            self.synthesizer.synthesize(&segment.voiceover_text, &path)?;
            raw.push((segment.id.clone(), path));
        }
        if raw.is_empty() {
            return Err(RenderError::NoUsableSegments);
        }

        let assets = self.normalize_all(&raw, &workspace)?;

        // timeline
        let durations = durations_by_segment(&assets);
        let resolved = resolve_timeline(&segments, &durations, self.config.timeline.collision_gap())?;
        let segments = compute_narration_timeline(&resolved.segments);
        validate_narration_timeline(&segments, self.config.timeline.narration_tolerance());
        let mut segments = attach_word_spans(&segments);

        let clips: HashMap<String, PathBuf> = assets
            .iter()
            .map(|a| (a.segment_id.clone(), a.local_path.clone()))
            .collect();

        // video
        let mut assembler = Assembler::new(self.backend, self.config)
            .with_cancel(self.cancel.clone())
            .with_pacing(Pacing::Placement);
        if let Some(tx) = self.progress.take() {
            assembler = assembler.with_progress(tx);
        }
        let staged_video = workspace.file(VIDEO_FILE);
        let report = assembler.assemble(video, &segments, &cleanup, &clips, &staged_video)?;

        // master narration
        self.cancel.check()?;
        let master_name = format!(
            "narration_{project_id}.{}",
            self.backend.master_extension()
        );
        let staged_master = workspace.file(&master_name);
        let parts = placed_layout(&segments, &clips)?;
        let total = write_master(self.backend, &parts, &workspace, &staged_master)?;
        let last_end = segments
            .iter()
            .filter(|s| s.is_kept())
            .filter_map(|s| s.end_time)
            .max()
            .unwrap_or(TimeUs::ZERO);
        if total.abs_diff(last_end) > self.config.timeline.invariant_tolerance() {
            return Err(RenderError::TimelineInvariantViolation {
                total: total.as_seconds(),
                last_end: last_end.as_seconds(),
            });
        }

        // publish
        let mut publisher = Publisher {
            storage: self.storage,
            config: self.config,
            project_id: &project_id,
            output_dir,
            staged: Vec::new(),
            uploaded: Vec::new(),
            moved: Vec::new(),
        };
        let published = publish_artifacts(
            &mut publisher,
            &mut segments,
            &raw,
            &staged_video,
            &staged_master,
            &master_name,
        );
        let (video_url, master_url) = match published {
            Ok(urls) => urls,
            Err(e) => {
                publisher.rollback();
                return Err(e);
            }
        };

        let narration = narration_duration(&segments);
        let metadata = PipelineMetadata {
            duration: report.duration,
            narration_duration: narration,
            has_silent_tail: report.duration > last_end,
        };

        let mut document = ScriptDocument::new(project_id.clone(), now);
        document.script = segments;
        document.cleanup_segments = generated.cleanup_segments;
        let document_path = output_dir.join(DOCUMENT_FILE);
        if let Err(e) = publisher.commit_with(&document, &workspace.file(DOCUMENT_FILE)) {
            publisher.rollback();
            return Err(e);
        }

        info!(
            project = %project_id,
            duration = %metadata.duration,
            narration = %metadata.narration_duration,
            silent_tail = metadata.has_silent_tail,
            collisions = resolved.collisions.len(),
            "Narration pipeline finished"
        );

        Ok(PipelineOutput {
            document,
            document_path,
            video_url,
            master_url,
            metadata,
            collisions: resolved.collisions,
        })
    }

    /// Normalize every voiceover to the intermediate format and measure it,
    /// at most `assembly.workers` at a time. Output order follows `raw`.
    fn normalize_all(&self, raw: &[(String, PathBuf)], workspace: &Workspace) -> Result<Vec<AudioAsset>> {
        let workers = self.config.assembly.workers.max(1);
        let jobs: Vec<(&String, &PathBuf, PathBuf)> = raw
            .iter()
            .enumerate()
            .map(|(idx, (id, path))| (id, path, workspace.file(format!("voice_{idx:03}.wav"))))
            .collect();

        let backend = self.backend;
        let mut assets = Vec::with_capacity(jobs.len());
        for batch in jobs.chunks(workers) {
            self.cancel.check()?;
            let results: Vec<Result<AudioAsset>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|(id, input, pcm)| {
                        scope.spawn(move || -> Result<AudioAsset> {
                            backend.normalize_audio(input, pcm)?;
                            let duration = backend.probe_duration(pcm)?;
                            debug!(segment = %id, duration = %duration, "Measured voiceover");
                            Ok(AudioAsset {
                                segment_id: (*id).clone(),
                                local_path: pcm.clone(),
                                duration,
                            })
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(RenderError::tool_failure("audio worker", "worker thread panicked"))
                        })
                    })
                    .collect()
            });
            for result in results {
                assets.push(result?);
            }
        }
        Ok(assets)
    }
}

/// Voiceovers first, then the video and the master. Returns the video and
/// master URLs and records each voiceover URL on its segment.
fn publish_artifacts(
    publisher: &mut Publisher<'_>,
    segments: &mut [ScriptSegment],
    raw: &[(String, PathBuf)],
    video: &Path,
    master: &Path,
    master_name: &str,
) -> Result<(String, String)> {
    let raw_paths: HashMap<&str, &PathBuf> = raw.iter().map(|(id, p)| (id.as_str(), p)).collect();
    for segment in segments.iter_mut().filter(|s| s.is_kept()) {
        let Some(path) = raw_paths.get(segment.id.as_str()) else {
            continue;
        };
        segment.audio_url = Some(publisher.voiceover(path)?);
    }
    let video_url = publisher.file(video, VIDEO_FILE)?;
    let master_url = publisher.file(master, master_name)?;
    Ok((video_url, master_url))
}

/// Sends finished artifacts to storage, or into the output directory when no
/// storage is configured, and returns the URL recorded in the document.
///
/// Local files are only staged until `commit`; uploads are remembered so a
/// failed run can take them back.
struct Publisher<'p> {
    storage: Option<&'p dyn RemoteStorage>,
    config: &'p EngineConfig,
    project_id: &'p str,
    output_dir: &'p Path,
    staged: Vec<(PathBuf, PathBuf)>,
    uploaded: Vec<String>,
    moved: Vec<PathBuf>,
}

impl Publisher<'_> {
    fn voiceover(&mut self, local: &Path) -> Result<String> {
        let name = file_name(local);
        match self.storage {
            Some(storage) => {
                let key = self.config.storage.voiceover_key(self.project_id, &name);
                self.upload(storage, local, key)
            }
            None => self.stage_local(local, &Path::new("voiceovers").join(&name)),
        }
    }

    fn file(&mut self, local: &Path, name: &str) -> Result<String> {
        match self.storage {
            Some(storage) => {
                let key = self.config.storage.project_key(self.project_id, name);
                self.upload(storage, local, key)
            }
            None => self.stage_local(local, Path::new(name)),
        }
    }

    fn upload(&mut self, storage: &dyn RemoteStorage, local: &Path, key: String) -> Result<String> {
        let url = storage.upload(&self.config.storage.bucket, local, &key)?;
        self.uploaded.push(key);
        Ok(url)
    }

    fn stage_local(&mut self, local: &Path, relative: &Path) -> Result<String> {
        let dest = std::path::absolute(self.output_dir.join(relative))?;
        self.staged.push((local.to_path_buf(), dest.clone()));
        Ok(dest.to_string_lossy().into_owned())
    }

    /// Save the document next to the staged files, then move everything
    /// into the output directory.
    fn commit_with(&mut self, document: &ScriptDocument, staged_document: &Path) -> Result<()> {
        document.save_to_file(staged_document)?;
        self.stage_local(staged_document, Path::new(DOCUMENT_FILE))?;

        std::fs::create_dir_all(self.output_dir)?;
        for (from, to) in &self.staged {
            persist(from, to)?;
            self.moved.push(to.clone());
        }
        Ok(())
    }

    /// Best effort: remove what was uploaded or already moved into place.
    fn rollback(&self) {
        if let Some(storage) = self.storage {
            for key in &self.uploaded {
                if let Err(e) = storage.delete(&self.config.storage.bucket, key) {
                    warn!(key = %key, error = %e, "Could not remove uploaded object");
                }
            }
        }
        for path in &self.moved {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
