use chrono::Local;
use narracut_core::captions::attach_word_spans;
use narracut_core::config::EngineConfig;
use narracut_core::timeline::compute_narration_timeline;
use narracut_core::types::{ScriptSegment, SegmentEdit, TimeUs};
use narracut_core::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::assemble::persist;
use crate::audio::{write_master, MasterPart};
use crate::cancel::CancelToken;
use crate::collab::{AudioLocation, RemoteStorage, Synthesizer, VideoRecord, VideoRepository, VideoUpdate};
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::workspace::Workspace;

/// How a segment's audio was obtained during a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOrigin {
    Regenerated,
    SlicedFromMaster,
    Fetched,
    FallbackRegenerated,
}

impl AudioOrigin {
    pub fn is_regenerated(self) -> bool {
        matches!(self, Self::Regenerated | Self::FallbackRegenerated)
    }
}

/// Per-segment observability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentChange {
    pub segment_id: String,
    pub origin: AudioOrigin,
    pub old_start: Option<TimeUs>,
    pub new_start: TimeUs,
    pub old_duration: Option<TimeUs>,
    pub new_duration: TimeUs,
    /// New minus old audio duration.
    pub audio_delta: TimeUs,
    /// New minus old start.
    pub timeline_shift: TimeUs,
}

#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub script: Vec<ScriptSegment>,
    pub master: PathBuf,
    pub total: TimeUs,
    pub changes: Vec<SegmentChange>,
    /// Freshly synthesized voiceovers, by segment id.
    pub regenerated: Vec<(String, PathBuf)>,
}

/// Result of a rebuild persisted through the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub script: Vec<ScriptSegment>,
    pub processed_audio_url: String,
    pub total: TimeUs,
    pub changes: Vec<SegmentChange>,
}

#[derive(Debug, Clone)]
pub struct MasterAudio {
    pub path: PathBuf,
    pub duration: TimeUs,
}

// ---------------------------------------------------------------------------
// Resolution strategies
// ---------------------------------------------------------------------------

struct Candidate<'s> {
    index: usize,
    segment: &'s ScriptSegment,
    edited: bool,
}

struct StrategyContext<'a> {
    backend: &'a dyn MediaBackend,
    synthesizer: &'a dyn Synthesizer,
    storage: Option<&'a dyn RemoteStorage>,
    master: Option<&'a MasterAudio>,
    workspace: &'a Workspace,
    voiceovers: &'a Path,
    stamp: &'a str,
    tolerance: TimeUs,
}

impl StrategyContext<'_> {
    fn has_source(&self, segment: &ScriptSegment) -> bool {
        let from_master = self.master.is_some() && segment.placement().is_some();
        let from_url = segment
            .audio_url
            .as_deref()
            .and_then(AudioLocation::parse)
            .is_some();
        from_master || from_url
    }

    fn synthesize(&self, candidate: &Candidate<'_>) -> Result<PathBuf> {
        let path = self.voiceovers.join(format!(
            "narration_{:02}_{}_{}.mp3",
            candidate.index + 1,
            candidate.segment.id,
            self.stamp
        ));
        self.synthesizer
            .synthesize(&candidate.segment.voiceover_text, &path)?;
        Ok(path)
    }
}

/// One way of obtaining a segment's audio. `Ok(None)` means "not applicable,
/// try the next one".
trait AudioStrategy: Send + Sync {
    fn origin(&self) -> AudioOrigin;
    fn resolve(&self, ctx: &StrategyContext<'_>, candidate: &Candidate<'_>) -> Result<Option<PathBuf>>;
}

struct Regenerate;

impl AudioStrategy for Regenerate {
    fn origin(&self) -> AudioOrigin {
        AudioOrigin::Regenerated
    }

    fn resolve(&self, ctx: &StrategyContext<'_>, candidate: &Candidate<'_>) -> Result<Option<PathBuf>> {
        if !candidate.edited && ctx.has_source(candidate.segment) {
            return Ok(None);
        }
        ctx.synthesize(candidate).map(Some)
    }
}

struct SliceFromMaster;

impl AudioStrategy for SliceFromMaster {
    fn origin(&self) -> AudioOrigin {
        AudioOrigin::SlicedFromMaster
    }

    fn resolve(&self, ctx: &StrategyContext<'_>, candidate: &Candidate<'_>) -> Result<Option<PathBuf>> {
        let (Some(master), Some(placement)) = (ctx.master, candidate.segment.placement()) else {
            return Ok(None);
        };
        if placement.is_empty() || placement.end > master.duration + ctx.tolerance {
            return Ok(None);
        }

        let range = placement.clamp_to(master.duration);
        let path = ctx.workspace.file(format!(
            "slice_{:03}.{}",
            candidate.index,
            ctx.backend.master_extension()
        ));
        match ctx.backend.slice_audio(&master.path, range, &path) {
            Ok(()) => Ok(Some(path)),
            Err(e) => {
                warn!(segment = %candidate.segment.id, error = %e, "Slicing from master failed");
                Ok(None)
            }
        }
    }
}

struct FetchRemote;

impl AudioStrategy for FetchRemote {
    fn origin(&self) -> AudioOrigin {
        AudioOrigin::Fetched
    }

    fn resolve(&self, ctx: &StrategyContext<'_>, candidate: &Candidate<'_>) -> Result<Option<PathBuf>> {
        let Some(location) = candidate
            .segment
            .audio_url
            .as_deref()
            .and_then(AudioLocation::parse)
        else {
            return Ok(None);
        };
        let name = location
            .file_name()
            .unwrap_or_else(|| "voiceover.mp3".to_string());
        let dest = ctx
            .workspace
            .file(format!("fetched_{:03}_{name}", candidate.index));
        match location.fetch(ctx.storage, &dest) {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                warn!(segment = %candidate.segment.id, error = %e, "Fetching stored audio failed");
                Ok(None)
            }
        }
    }
}

struct FallbackRegenerate;

impl AudioStrategy for FallbackRegenerate {
    fn origin(&self) -> AudioOrigin {
        AudioOrigin::FallbackRegenerated
    }

    fn resolve(&self, ctx: &StrategyContext<'_>, candidate: &Candidate<'_>) -> Result<Option<PathBuf>> {
        let missing = RenderError::MissingAudioSource(candidate.segment.id.clone());
        warn!(error = %missing, "Synthesizing again");
        ctx.synthesize(candidate).map(Some)
    }
}

fn default_strategies() -> Vec<Box<dyn AudioStrategy>> {
    vec![
        Box::new(Regenerate),
        Box::new(SliceFromMaster),
        Box::new(FetchRemote),
        Box::new(FallbackRegenerate),
    ]
}

// ---------------------------------------------------------------------------
// Rebuilder
// ---------------------------------------------------------------------------

/// Apply text edits, returning the edited script and the ids whose text
/// actually changed.
pub fn apply_edits(
    script: &[ScriptSegment],
    edits: &[SegmentEdit],
) -> Result<(Vec<ScriptSegment>, HashSet<String>)> {
    let mut script = script.to_vec();
    let mut edited = HashSet::new();
    for edit in edits {
        let segment = script
            .iter_mut()
            .find(|s| s.id == edit.id)
            .ok_or_else(|| CoreError::SegmentNotFound(edit.id.clone()))?;
        if segment.voiceover_text != edit.voiceover_text {
            segment.voiceover_text = edit.voiceover_text.clone();
            edited.insert(edit.id.clone());
        }
    }
    Ok((script, edited))
}

pub struct SurgicalRebuilder<'a> {
    backend: &'a dyn MediaBackend,
    synthesizer: &'a dyn Synthesizer,
    storage: Option<&'a dyn RemoteStorage>,
    config: &'a EngineConfig,
    cancel: CancelToken,
    strategies: Vec<Box<dyn AudioStrategy>>,
}

impl<'a> SurgicalRebuilder<'a> {
    pub fn new(
        backend: &'a dyn MediaBackend,
        synthesizer: &'a dyn Synthesizer,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            backend,
            synthesizer,
            storage: None,
            config,
            cancel: CancelToken::none(),
            strategies: default_strategies(),
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

    /// Re-derive the narration after `edits`, reusing unedited audio.
    ///
    /// The new master and any regenerated voiceovers are written to
    /// `output_dir` only after the duration invariant has been checked.
    pub fn rebuild(
        &self,
        script: &[ScriptSegment],
        edits: &[SegmentEdit],
        master: Option<&Path>,
        output_dir: &Path,
    ) -> Result<RebuildOutcome> {
        let (script, edited) = apply_edits(script, edits)?;
        let workspace = Workspace::new("rebuild")?;
        let voiceovers = workspace.subdir("voiceovers")?;
        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();

        let master = master.and_then(|path| match self.backend.probe_duration(path) {
            Ok(duration) => Some(MasterAudio {
                path: path.to_path_buf(),
                duration,
            }),
            Err(e) => {
                warn!(master = %path.display(), error = %e, "Previous master unusable");
                None
            }
        });

        let ctx = StrategyContext {
            backend: self.backend,
            synthesizer: self.synthesizer,
            storage: self.storage,
            master: master.as_ref(),
            workspace: &workspace,
            voiceovers: &voiceovers,
            stamp: &stamp,
            tolerance: self.config.timeline.invariant_tolerance(),
        };

        // resolve and normalize every kept segment's audio
        let mut resolved: HashMap<String, (AudioOrigin, PathBuf, PathBuf, TimeUs)> = HashMap::new();
        for (index, segment) in script.iter().enumerate() {
            if !segment.is_kept() {
                continue;
            }
            self.cancel.check()?;
            let candidate = Candidate {
                index,
                segment,
                edited: edited.contains(&segment.id),
            };
            let (origin, raw) = self.resolve_audio(&ctx, &candidate)?;
            info!(segment = %segment.id, origin = ?origin, "Resolved segment audio");

            let pcm = workspace.file(format!("seg_{index:03}.wav"));
            self.backend.normalize_audio(&raw, &pcm)?;
            let duration = self.backend.probe_duration(&pcm)?;
            resolved.insert(segment.id.clone(), (origin, raw, pcm, duration));
        }

        if resolved.is_empty() {
            return Err(RenderError::NoUsableSegments);
        }

        // sequential timeline from zero, pauses between segments only
        let kept_ids: Vec<&str> = script
            .iter()
            .filter(|s| s.is_kept())
            .map(|s| s.id.as_str())
            .collect();
        let mut cursor = TimeUs::ZERO;
        let mut parts = Vec::new();
        let mut changes = Vec::new();
        let mut retimed = Vec::with_capacity(script.len());
        let mut last_end = TimeUs::ZERO;
        let mut kept_seen = 0;

        for segment in &script {
            let mut segment = segment.clone();
            let Some((origin, _, pcm, duration)) = resolved.get(&segment.id) else {
                retimed.push(segment);
                continue;
            };
            kept_seen += 1;

            let start = cursor;
            let end = start + *duration;
            changes.push(SegmentChange {
                segment_id: segment.id.clone(),
                origin: *origin,
                old_start: segment.start_time,
                new_start: start,
                old_duration: segment.audio_duration,
                new_duration: *duration,
                audio_delta: *duration - segment.audio_duration.unwrap_or(TimeUs::ZERO),
                timeline_shift: start - segment.start_time.unwrap_or(TimeUs::ZERO),
            });

            segment.start_time = Some(start);
            segment.end_time = Some(end);
            segment.audio_duration = Some(*duration);
            parts.push(MasterPart::Clip {
                segment_id: segment.id.clone(),
                path: pcm.clone(),
            });
            last_end = end;
            cursor = end;

            if kept_seen < kept_ids.len() && segment.pause_duration > TimeUs::ZERO {
                parts.push(MasterPart::Silence(segment.pause_duration));
                cursor = cursor + segment.pause_duration;
            }
            retimed.push(segment);
        }

        let retimed = attach_word_spans(&compute_narration_timeline(&retimed));

        let master_name = format!("narration_updated_{stamp}.{}", self.backend.master_extension());
        let staged_master = workspace.file(&master_name);
        let total = write_master(self.backend, &parts, &workspace, &staged_master)?;

        let tolerance = self.config.timeline.invariant_tolerance();
        if total.abs_diff(last_end) > tolerance {
            return Err(RenderError::TimelineInvariantViolation {
                total: total.as_seconds(),
                last_end: last_end.as_seconds(),
            });
        }

        // invariant holds: move results out of the workspace
        std::fs::create_dir_all(output_dir)?;
        let master_path = output_dir.join(&master_name);
        persist(&staged_master, &master_path)?;

        let mut regenerated = Vec::new();
        let mut script = retimed;
        for segment in script.iter_mut() {
            let Some((origin, raw, _, _)) = resolved.get(&segment.id) else {
                continue;
            };
            if !origin.is_regenerated() {
                continue;
            }
            let file_name = raw
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| format!("{}.mp3", segment.id).into());
            let dest = output_dir.join("voiceovers").join(file_name);
            persist(raw, &dest)?;
            segment.audio_url = Some(dest.to_string_lossy().into_owned());
            regenerated.push((segment.id.clone(), dest));
        }

        info!(
            total = %total,
            regenerated = regenerated.len(),
            reused = resolved.len() - regenerated.len(),
            "Rebuilt narration"
        );

        Ok(RebuildOutcome {
            script,
            master: master_path,
            total,
            changes,
            regenerated,
        })
    }

    fn resolve_audio(
        &self,
        ctx: &StrategyContext<'_>,
        candidate: &Candidate<'_>,
    ) -> Result<(AudioOrigin, PathBuf)> {
        for strategy in &self.strategies {
            if let Some(path) = strategy.resolve(ctx, candidate)? {
                return Ok((strategy.origin(), path));
            }
        }
        Err(RenderError::MissingAudioSource(candidate.segment.id.clone()))
    }

    /// Rebuild a stored video record for its owner and persist the result.
    pub fn rebuild_video(
        &self,
        repo: &dyn VideoRepository,
        video_id: &str,
        user_id: &str,
        edits: &[SegmentEdit],
    ) -> Result<SyncResult> {
        let record = repo
            .get(video_id)?
            .ok_or_else(|| RenderError::NotFound(format!("video {video_id}")))?;
        if record.created_by != user_id {
            return Err(RenderError::Unauthorized);
        }
        let storage = self
            .storage
            .ok_or_else(|| RenderError::Storage("no storage configured".into()))?;

        let project_id = record
            .project_id
            .clone()
            .unwrap_or_else(|| record.id.clone());
        let bucket = infer_bucket(&record).unwrap_or_else(|| self.config.storage.bucket.clone());

        let workspace = Workspace::new("sync")?;
        let previous_master = record
            .processed_audio_url
            .as_deref()
            .and_then(AudioLocation::parse)
            .and_then(|location| {
                let dest = workspace.file(format!(
                    "previous_master.{}",
                    self.backend.master_extension()
                ));
                match location.fetch(Some(storage), &dest) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(error = %e, "Could not fetch previous master, reusing per-segment audio");
                        None
                    }
                }
            });

        let output_dir = workspace.subdir("out")?;
        let mut outcome = self.rebuild(&record.script, edits, previous_master.as_deref(), &output_dir)?;

        let mut uploaded = Vec::new();
        let persisted = self
            .upload_outcome(storage, &bucket, &project_id, &mut outcome, &mut uploaded)
            .and_then(|master_url| {
                repo.update(
                    video_id,
                    VideoUpdate {
                        script: Some(outcome.script.clone()),
                        processed_audio_url: Some(master_url.clone()),
                        ..VideoUpdate::default()
                    },
                )?;
                Ok(master_url)
            });
        let master_url = match persisted {
            Ok(url) => url,
            Err(e) => {
                for key in &uploaded {
                    if let Err(cleanup) = storage.delete(&bucket, key) {
                        warn!(key = %key, error = %cleanup, "Could not remove uploaded object");
                    }
                }
                return Err(e);
            }
        };
        info!(video = %video_id, url = %master_url, "Persisted rebuilt narration");

        Ok(SyncResult {
            script: outcome.script,
            processed_audio_url: master_url,
            total: outcome.total,
            changes: outcome.changes,
        })
    }
}

impl SurgicalRebuilder<'_> {
    /// Upload regenerated voiceovers, then the master. Keys that made it up
    /// are pushed to `uploaded`.
    fn upload_outcome(
        &self,
        storage: &dyn RemoteStorage,
        bucket: &str,
        project_id: &str,
        outcome: &mut RebuildOutcome,
        uploaded: &mut Vec<String>,
    ) -> Result<String> {
        for (segment_id, path) in &outcome.regenerated {
            let key = self.config.storage.voiceover_key(project_id, &file_name_of(path));
            let url = storage.upload(bucket, path, &key)?;
            uploaded.push(key);
            if let Some(segment) = outcome.script.iter_mut().find(|s| &s.id == segment_id) {
                segment.audio_url = Some(url);
            }
        }

        let master_key = self
            .config
            .storage
            .project_key(project_id, &file_name_of(&outcome.master));
        let url = storage.upload(bucket, &outcome.master, &master_key)?;
        uploaded.push(master_key);
        Ok(url)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Bucket of the record's existing URLs, preferring the master audio.
pub(crate) fn infer_bucket(record: &VideoRecord) -> Option<String> {
    let first_segment_url = record.script.first().and_then(|s| s.audio_url.clone());
    [
        record.processed_audio_url.clone(),
        record.processed_video_url.clone(),
        first_segment_url,
    ]
    .into_iter()
    .flatten()
    .find_map(|url| AudioLocation::parse(&url)?.bucket().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::LocalStorage;
    use crate::fake::{FakeBackend, FakeSynthesizer, MemoryRepository, RefusingStorage};
    use narracut_core::types::TimeRange;
    use tempfile::TempDir;

    fn secs(s: f64) -> TimeUs {
        TimeUs::from_seconds(s)
    }

    fn r(start: f64, end: f64) -> TimeRange {
        TimeRange::from_seconds(start, end)
    }

    fn placed(id: &str, text: &str, start: f64, end: f64) -> ScriptSegment {
        let mut s = ScriptSegment::new(id, secs(start), text);
        s.start_time = Some(secs(start));
        s.end_time = Some(secs(end));
        s.audio_duration = Some(secs(end - start));
        s
    }

    fn edit(id: &str, text: &str) -> SegmentEdit {
        SegmentEdit {
            id: id.into(),
            voiceover_text: text.into(),
        }
    }

    /// 30 s master holding s1 [0,10), s2 [10,14), s3 [14,30).
    fn thirty_second_fixture(dir: &Path, backend: &FakeBackend) -> (Vec<ScriptSegment>, PathBuf) {
        let master = dir.join("narration.mp3");
        backend.write_media(&master, secs(30.0));
        let script = vec![
            placed("s1", "Open the dashboard.", 0.0, 10.0),
            placed("s2", "Click export.", 10.0, 14.0),
            placed("s3", "Pick a format and save.", 14.0, 30.0),
        ];
        (script, master)
    }

    #[test]
    fn editing_one_segment_reuses_the_rest_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let (script, master) = thirty_second_fixture(dir.path(), &backend);
        let synth = FakeSynthesizer::new()
            .with_duration("Click the export button.", secs(5.0))
            .with_duration("Press export.", secs(3.0));
        let config = EngineConfig::default();
        let rebuilder = SurgicalRebuilder::new(&backend, &synth, &config);

        let first = rebuilder
            .rebuild(
                &script,
                &[edit("s2", "Click the export button.")],
                Some(&master),
                &dir.path().join("run1"),
            )
            .unwrap();
        let first_slices = backend.calls_matching("slice");

        let second = rebuilder
            .rebuild(
                &script,
                &[edit("s2", "Press export.")],
                Some(&master),
                &dir.path().join("run2"),
            )
            .unwrap();
        let second_slices: Vec<_> = backend.calls_matching("slice").split_off(first_slices.len());

        let ranges: Vec<TimeRange> = first_slices.iter().filter_map(|c| c.range).collect();
        assert_eq!(ranges, vec![r(0.0, 10.0), r(14.0, 30.0)]);
        let first_sums: Vec<&str> = first_slices.iter().map(|c| c.checksum.as_str()).collect();
        let second_sums: Vec<&str> = second_slices.iter().map(|c| c.checksum.as_str()).collect();
        assert_eq!(first_sums, second_sums);

        assert_eq!(synth.spoken(), vec!["Click the export button.", "Press export."]);

        assert_eq!(first.total, secs(31.0));
        assert_eq!(first.script[2].start_time, Some(secs(15.0)));
        assert_eq!(second.total, secs(29.0));
        assert_eq!(second.script[2].start_time, Some(secs(13.0)));

        let s2 = &first.changes[1];
        assert_eq!(s2.origin, AudioOrigin::Regenerated);
        assert_eq!(s2.audio_delta, secs(1.0));
        let s3 = &first.changes[2];
        assert_eq!(s3.origin, AudioOrigin::SlicedFromMaster);
        assert_eq!(s3.timeline_shift, secs(1.0));
        assert_eq!(s3.audio_delta, TimeUs::ZERO);

        assert_eq!(first.regenerated.len(), 1);
        assert_eq!(first.regenerated[0].0, "s2");
        assert!(first.regenerated[0].1.exists());
        assert!(first.master.exists());
    }

    #[test]
    fn pauses_separate_segments_but_do_not_trail() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let (mut script, master) = thirty_second_fixture(dir.path(), &backend);
        script[0].pause_duration = secs(0.5);
        script[2].pause_duration = secs(2.0);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), dir.path())
            .unwrap();

        assert_eq!(outcome.script[1].start_time, Some(secs(10.5)));
        assert_eq!(outcome.script[2].end_time, Some(secs(30.5)));
        assert_eq!(outcome.total, secs(30.5));
        assert!(synth.spoken().is_empty());

        let timeline = narracut_core::timeline::narration_timeline(&outcome.script);
        assert!(timeline.is_contiguous());
        assert_eq!(timeline.total, secs(32.5));
    }

    #[test]
    fn invariant_violation_aborts_before_persisting() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new().with_master_drift(TimeUs::from_millis(200));
        let (script, master) = thirty_second_fixture(dir.path(), &backend);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();
        let out = dir.path().join("out");

        let err = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[edit("s1", "Changed.")], Some(&master), &out)
            .unwrap_err();
        assert!(matches!(err, RenderError::TimelineInvariantViolation { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn small_drift_within_tolerance_is_accepted() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new().with_master_drift(TimeUs::from_millis(5));
        let (script, master) = thirty_second_fixture(dir.path(), &backend);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();
        assert!(SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), dir.path())
            .is_ok());
    }

    #[test]
    fn encoder_padding_on_the_master_is_not_drift() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new().with_encoder_padding(TimeUs::from_millis(50));
        let (script, master) = thirty_second_fixture(dir.path(), &backend);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), &dir.path().join("out"))
            .unwrap();
        assert_eq!(outcome.total, secs(30.0));
        assert_eq!(backend.probe_duration(&outcome.master).unwrap(), secs(30.05));
    }

    #[test]
    fn without_master_stored_audio_is_fetched() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let stored = dir.path().join("stored_s1.mp3");
        backend.write_media(&stored, secs(2.0));
        let mut segment = placed("s1", "Hello.", 0.0, 2.0);
        segment.audio_url = Some(stored.to_string_lossy().into_owned());
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&[segment], &[], None, dir.path())
            .unwrap();
        assert_eq!(outcome.changes[0].origin, AudioOrigin::Fetched);
        assert!(synth.spoken().is_empty());
        assert!(outcome.regenerated.is_empty());
    }

    #[test]
    fn no_source_at_all_regenerates() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();
        let segment = ScriptSegment::new("s1", TimeUs::ZERO, "Brand new line");

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&[segment], &[], None, dir.path())
            .unwrap();
        assert_eq!(outcome.changes[0].origin, AudioOrigin::Regenerated);
        assert_eq!(outcome.total, secs(1.5));
        assert_eq!(outcome.script[0].audio_url.as_deref(), outcome.regenerated[0].1.to_str());
    }

    #[test]
    fn failed_slice_and_fetch_fall_back_to_synthesis() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new().failing_on("slice");
        let (mut script, master) = thirty_second_fixture(dir.path(), &backend);
        script[0].audio_url = Some(dir.path().join("gone.mp3").to_string_lossy().into_owned());
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), dir.path())
            .unwrap();
        let origins: Vec<AudioOrigin> = outcome.changes.iter().map(|c| c.origin).collect();
        assert_eq!(origins, vec![AudioOrigin::FallbackRegenerated; 3]);
        assert_eq!(synth.spoken().len(), 3);
    }

    #[test]
    fn placement_beyond_master_is_not_sliced() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let master = dir.path().join("short.mp3");
        backend.write_media(&master, secs(5.0));
        let script = vec![placed("s1", "One.", 0.0, 4.0), placed("s2", "Two two.", 4.0, 9.0)];
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), dir.path())
            .unwrap();
        assert_eq!(outcome.changes[0].origin, AudioOrigin::SlicedFromMaster);
        assert_eq!(outcome.changes[1].origin, AudioOrigin::FallbackRegenerated);
    }

    #[test]
    fn deleted_segments_are_skipped() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let (mut script, master) = thirty_second_fixture(dir.path(), &backend);
        script[1].is_deleted = true;
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[], Some(&master), dir.path())
            .unwrap();
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(outcome.script[2].start_time, Some(secs(10.0)));
        assert_eq!(outcome.script[1].narration_start, None);
        assert_eq!(outcome.total, secs(26.0));
    }

    #[test]
    fn rebuild_keeps_nominal_timestamps() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let (mut script, master) = thirty_second_fixture(dir.path(), &backend);
        script[2].timestamp = secs(20.0);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();

        let outcome = SurgicalRebuilder::new(&backend, &synth, &config)
            .rebuild(&script, &[edit("s1", "Short.")], Some(&master), dir.path())
            .unwrap();
        assert_eq!(outcome.script[2].timestamp, secs(20.0));
    }

    #[test]
    fn unknown_edit_id_is_rejected() {
        let script = vec![placed("s1", "a", 0.0, 1.0)];
        let err = apply_edits(&script, &[edit("nope", "b")]).unwrap_err();
        assert!(matches!(err, RenderError::Core(CoreError::SegmentNotFound(_))));
    }

    #[test]
    fn unchanged_text_is_not_an_edit() {
        let script = vec![placed("s1", "same", 0.0, 1.0)];
        let (_, edited) = apply_edits(&script, &[edit("s1", "same")]).unwrap();
        assert!(edited.is_empty());
    }

    #[test]
    fn cancellation_stops_before_next_segment() {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let (script, master) = thirty_second_fixture(dir.path(), &backend);
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();
        let (tx, rx) = tokio::sync::watch::channel(true);

        let err = SurgicalRebuilder::new(&backend, &synth, &config)
            .with_cancel(CancelToken::new(rx))
            .rebuild(&script, &[], Some(&master), dir.path())
            .unwrap_err();
        drop(tx);
        assert!(matches!(err, RenderError::Cancelled));
        assert!(backend.calls_matching("slice").is_empty());
    }

    // -----------------------------------------------------------------------
    // Persistence boundary
    // -----------------------------------------------------------------------

    fn stored_record(storage: &LocalStorage, backend: &FakeBackend, scratch: &Path) -> VideoRecord {
        let master = scratch.join("narration_demo.mp3");
        backend.write_media(&master, secs(30.0));
        let master_url = storage
            .upload("media", &master, "processed/demo/narration_demo.mp3")
            .unwrap();
        let (script, _) = thirty_second_fixture(scratch, backend);
        VideoRecord {
            id: "vid-1".into(),
            created_by: "user-1".into(),
            project_id: Some("demo".into()),
            script,
            processed_audio_url: Some(master_url),
            ..VideoRecord::default()
        }
    }

    #[test]
    fn rebuild_video_checks_existence_and_ownership() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());
        let backend = FakeBackend::new();
        let repo = MemoryRepository::with(stored_record(&storage, &backend, scratch.path()));
        let synth = FakeSynthesizer::new();
        let config = EngineConfig::default();
        let rebuilder = SurgicalRebuilder::new(&backend, &synth, &config).with_storage(&storage);

        let missing = rebuilder.rebuild_video(&repo, "vid-404", "user-1", &[]).unwrap_err();
        assert!(matches!(missing, RenderError::NotFound(_)));

        let stranger = rebuilder.rebuild_video(&repo, "vid-1", "user-2", &[]).unwrap_err();
        assert!(matches!(stranger, RenderError::Unauthorized));
        assert!(synth.spoken().is_empty());
    }

    #[test]
    fn rebuild_video_uploads_only_regenerated_audio_and_master() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path());
        let backend = FakeBackend::new();
        let repo = MemoryRepository::with(stored_record(&storage, &backend, scratch.path()));
        let synth = FakeSynthesizer::new().with_duration("Click the export button.", secs(5.0));
        let config = EngineConfig::default();

        let result = SurgicalRebuilder::new(&backend, &synth, &config)
            .with_storage(&storage)
            .rebuild_video(&repo, "vid-1", "user-1", &[edit("s2", "Click the export button.")])
            .unwrap();

        assert_eq!(result.total, secs(31.0));
        let uploaded = storage.object_path(&config.storage.bucket, "processed/demo/voiceovers");
        let voiceovers: Vec<_> = std::fs::read_dir(uploaded).unwrap().collect();
        assert_eq!(voiceovers.len(), 1);

        let record = repo.record("vid-1").unwrap();
        assert_eq!(record.processed_audio_url.as_deref(), Some(result.processed_audio_url.as_str()));
        assert!(result.processed_audio_url.contains("narration_updated_"));
        assert_eq!(record.script[1].voiceover_text, "Click the export button.");
        assert!(record.script[1]
            .audio_url
            .as_deref()
            .is_some_and(|u| u.contains("processed/demo/voiceovers/")));
        assert_eq!(record.script[0].audio_url, None);
        assert_eq!(record.script[2].start_time, Some(secs(15.0)));
    }

    #[test]
    fn refused_master_upload_rolls_back_voiceovers() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let storage = RefusingStorage {
            inner: LocalStorage::new(root.path()),
            refuse: "narration_updated_",
        };
        let backend = FakeBackend::new();
        let repo = MemoryRepository::with(stored_record(&storage.inner, &backend, scratch.path()));
        let synth = FakeSynthesizer::new().with_duration("Click the export button.", secs(5.0));
        let config = EngineConfig::default();

        let err = SurgicalRebuilder::new(&backend, &synth, &config)
            .with_storage(&storage)
            .rebuild_video(&repo, "vid-1", "user-1", &[edit("s2", "Click the export button.")])
            .unwrap_err();
        assert!(matches!(err, RenderError::Storage(_)));

        let uploaded = storage
            .inner
            .object_path(&config.storage.bucket, "processed/demo/voiceovers");
        let voiceovers: Vec<_> = std::fs::read_dir(uploaded)
            .map(|entries| entries.collect())
            .unwrap_or_default();
        assert!(voiceovers.is_empty());
        assert_eq!(repo.record("vid-1").unwrap().script[1].voiceover_text, "Click export.");
    }

    #[test]
    fn bucket_comes_from_existing_urls() {
        let mut record = VideoRecord {
            processed_video_url: Some("https://storage.googleapis.com/clips-eu/p/final.mp4".into()),
            ..VideoRecord::default()
        };
        assert_eq!(infer_bucket(&record).as_deref(), Some("clips-eu"));
        record.processed_audio_url = Some("gs://audio-eu/p/n.mp3".into());
        assert_eq!(infer_bucket(&record).as_deref(), Some("audio-eu"));
        assert_eq!(infer_bucket(&VideoRecord::default()), None);
    }
}
