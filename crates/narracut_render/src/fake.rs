//! Stand-ins for ffmpeg and the collaborators, used by unit tests.
//!
//! A "media file" is a small text file: the first line carries the duration
//! in microseconds, the rest is an opaque body that operations combine
//! deterministically, so identical inputs always yield identical bytes.

use narracut_core::config::CanvasLayout;
use narracut_core::script::GeneratedScript;
use narracut_core::types::{TimeRange, TimeUs};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::canvas::FittedSize;
use crate::collab::{
    LocalStorage, RemoteStorage, ScriptGenerator, Synthesizer, VideoRecord, VideoRepository,
    VideoUpdate,
};
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::probe::MediaInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: String,
    pub input: Option<PathBuf>,
    pub range: Option<TimeRange>,
    pub output: PathBuf,
    pub checksum: String,
}

#[derive(Default)]
pub struct FakeBackend {
    has_audio: bool,
    freeze_log: String,
    silence_log: String,
    fail_on: Option<String>,
    master_drift: TimeUs,
    encoder_padding: TimeUs,
    calls: Mutex<Vec<Call>>,
}

pub fn checksum(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }

    pub fn with_freeze_log(mut self, log: &str) -> Self {
        self.freeze_log = log.to_string();
        self
    }

    pub fn with_silence_log(mut self, log: &str) -> Self {
        self.silence_log = log.to_string();
        self
    }

    /// Make every call to `op` fail like a non-zero ffmpeg exit, leaving a
    /// truncated output file behind.
    pub fn failing_on(mut self, op: &str) -> Self {
        self.fail_on = Some(op.to_string());
        self
    }

    /// Joined narration comes out this much longer than its parts.
    pub fn with_master_drift(mut self, drift: TimeUs) -> Self {
        self.master_drift = drift;
        self
    }

    /// Encoded masters come out this much longer than the PCM they came from.
    pub fn with_encoder_padding(mut self, padding: TimeUs) -> Self {
        self.encoder_padding = padding;
        self
    }

    pub fn write_media(&self, path: &Path, duration: TimeUs) {
        write_file(path, duration, &format!("source {}", path.display()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_matching(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn record(&self, op: &str, input: Option<&Path>, range: Option<TimeRange>, output: &Path) -> Result<()> {
        let bytes = std::fs::read(output)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                op: op.to_string(),
                input: input.map(Path::to_path_buf),
                range,
                output: output.to_path_buf(),
                checksum: checksum(&bytes),
            });
        }
        Ok(())
    }

    fn check_failure(&self, op: &str, output: &Path) -> Result<()> {
        if self.fail_on.as_deref() == Some(op) {
            let _ = std::fs::write(output, "partial");
            return Err(RenderError::tool_failure(format!("ffmpeg {op}"), "simulated failure"));
        }
        Ok(())
    }
}

fn write_file(path: &Path, duration: TimeUs, body: &str) {
    let _ = std::fs::write(path, format!("{}\n{body}", duration.0));
}

fn read_file(path: &Path) -> Result<(TimeUs, String)> {
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let (first, body) = text.split_once('\n').unwrap_or((text.as_str(), ""));
    let micros = first
        .trim()
        .parse::<i64>()
        .map_err(|_| RenderError::FfprobeFailed(format!("{}: not media", path.display())))?;
    Ok((TimeUs(micros), body.to_string()))
}

impl MediaBackend for FakeBackend {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let (duration, _) = read_file(path)?;
        Ok(MediaInfo {
            duration,
            has_video: true,
            has_audio: self.has_audio,
            width: 1920,
            height: 1080,
            fps: 30.0,
            audio_codec: None,
            audio_sample_rate: 0,
            audio_channels: 0,
        })
    }

    fn cut_video(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.check_failure("cut", output)?;
        let (_, body) = read_file(input)?;
        write_file(output, range.duration(), &format!("cut {range} of [{body}]"));
        self.record("cut", Some(input), Some(range), output)
    }

    fn concat_videos(&self, clips: &[PathBuf], output: &Path) -> Result<()> {
        self.check_failure("concat", output)?;
        let mut total = TimeUs::ZERO;
        let mut bodies = Vec::new();
        for clip in clips {
            let (d, body) = read_file(clip)?;
            total = total + d;
            bodies.push(body);
        }
        write_file(output, total, &bodies.join(" + "));
        self.record("concat", None, None, output)
    }

    fn freeze_to_duration(&self, input: &Path, target: TimeUs, output: &Path) -> Result<()> {
        self.check_failure("freeze", output)?;
        let (current, body) = read_file(input)?;
        if current >= target {
            std::fs::copy(input, output)?;
        } else {
            write_file(output, target, &format!("{body} hold {}", target - current));
        }
        self.record("freeze", Some(input), None, output)
    }

    fn attach_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.check_failure("attach", output)?;
        let (d, vbody) = read_file(video)?;
        let (_, abody) = read_file(audio)?;
        write_file(output, d, &format!("{vbody} with [{abody}]"));
        self.record("attach", Some(audio), None, output)
    }

    fn export_clip(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.check_failure("export", output)?;
        let (_, body) = read_file(input)?;
        write_file(output, range.duration(), &format!("export {range} of [{body}]"));
        self.record("export", Some(input), Some(range), output)
    }

    fn normalize_audio(&self, input: &Path, output: &Path) -> Result<()> {
        self.check_failure("normalize", output)?;
        let (d, body) = read_file(input)?;
        write_file(output, d, &format!("pcm [{body}]"));
        self.record("normalize", Some(input), None, output)
    }

    fn make_silence(&self, duration: TimeUs, output: &Path) -> Result<()> {
        self.check_failure("silence", output)?;
        write_file(output, duration, "silence");
        self.record("silence", None, None, output)
    }

    fn slice_audio(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.check_failure("slice", output)?;
        let bytes = std::fs::read(input)?;
        write_file(
            output,
            range.duration(),
            &format!("slice {range} of {}", checksum(&bytes)),
        );
        self.record("slice", Some(input), Some(range), output)
    }

    fn concat_audio(&self, parts: &[PathBuf], output: &Path) -> Result<()> {
        self.check_failure("concat_audio", output)?;
        let mut total = TimeUs::ZERO;
        let mut bodies = Vec::new();
        for part in parts {
            let (d, body) = read_file(part)?;
            total = total + d;
            bodies.push(body);
        }
        write_file(output, total + self.master_drift, &bodies.join(" | "));
        self.record("concat_audio", None, None, output)
    }

    fn encode_master(&self, input: &Path, output: &Path) -> Result<()> {
        self.check_failure("master", output)?;
        let (d, body) = read_file(input)?;
        write_file(output, d + self.encoder_padding, &format!("mp3 [{body}]"));
        self.record("master", Some(input), None, output)
    }

    fn extract_frame(&self, input: &Path, at: TimeUs, output: &Path) -> Result<()> {
        self.check_failure("frame", output)?;
        let (duration, body) = read_file(input)?;
        if at < TimeUs::ZERO || at >= duration {
            return Err(RenderError::tool_failure(
                format!("ffmpeg frame at {at}"),
                "Output file is empty, nothing was encoded",
            ));
        }
        write_file(output, TimeUs::ZERO, &format!("frame {at} of [{body}]"));
        self.record("frame", Some(input), None, output)
    }

    fn composite_on_background(
        &self,
        video: &Path,
        background: &Path,
        canvas: &CanvasLayout,
        fitted: FittedSize,
        output: &Path,
    ) -> Result<()> {
        self.check_failure("background", output)?;
        let (d, body) = read_file(video)?;
        if !background.exists() {
            return Err(RenderError::FileNotFound(background.to_path_buf()));
        }
        write_file(
            output,
            d,
            &format!(
                "[{body}] at {}x{} on {}x{}",
                fitted.width, fitted.height, canvas.canvas_width, canvas.canvas_height
            ),
        );
        self.record("background", Some(video), None, output)
    }

    fn detect_freezes(&self, _input: &Path, _noise: f64, _min_duration: f64) -> Result<String> {
        Ok(self.freeze_log.clone())
    }

    fn detect_silences(&self, _input: &Path, _noise_db: f64, _min_duration: f64) -> Result<String> {
        Ok(self.silence_log.clone())
    }

    fn master_extension(&self) -> &str {
        "mp3"
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Speaks half a second per word, or an explicit duration per text.
#[derive(Default)]
pub struct FakeSynthesizer {
    durations: HashMap<String, TimeUs>,
    fail: bool,
    spoken: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, text: &str, duration: TimeUs) -> Self {
        self.durations.insert(text.to_string(), duration);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Synthesizer for FakeSynthesizer {
    fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
        if self.fail {
            return Err(RenderError::Synthesis("voice service unavailable".into()));
        }
        let duration = self.durations.get(text).copied().unwrap_or_else(|| {
            TimeUs::from_millis(500) * text.split_whitespace().count().max(1) as i64
        });
        write_file(output, duration, &format!("speech: {text}"));
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        Ok(())
    }
}

pub struct FakeScriptGenerator {
    pub script: GeneratedScript,
}

impl ScriptGenerator for FakeScriptGenerator {
    fn generate(&self, _video: &Path) -> Result<GeneratedScript> {
        Ok(self.script.clone())
    }
}

/// Local storage that refuses objects whose file name has a given prefix.
pub struct RefusingStorage {
    pub inner: LocalStorage,
    pub refuse: &'static str,
}

impl RemoteStorage for RefusingStorage {
    fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<PathBuf> {
        self.inner.download(bucket, key, local)
    }

    fn upload(&self, bucket: &str, local: &Path, key: &str) -> Result<String> {
        if key.rsplit('/').next().is_some_and(|name| name.starts_with(self.refuse)) {
            return Err(RenderError::Storage(format!("upload of {key} refused")));
        }
        self.inner.upload(bucket, local, key)
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete(bucket, key)
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<String, VideoRecord>>,
}

impl MemoryRepository {
    pub fn with(record: VideoRecord) -> Self {
        let repo = Self::default();
        if let Ok(mut records) = repo.records.lock() {
            records.insert(record.id.clone(), record);
        }
        repo
    }

    pub fn record(&self, id: &str) -> Option<VideoRecord> {
        self.records.lock().ok()?.get(id).cloned()
    }
}

impl VideoRepository for MemoryRepository {
    fn get(&self, id: &str) -> Result<Option<VideoRecord>> {
        Ok(self.record(id))
    }

    fn update(&self, id: &str, update: VideoUpdate) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| RenderError::Storage("repository lock poisoned".into()))?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| RenderError::NotFound(id.to_string()))?;
        if let Some(script) = update.script {
            record.script = script;
        }
        if let Some(url) = update.processed_audio_url {
            record.processed_audio_url = Some(url);
        }
        if let Some(guide) = update.documentation {
            record.documentation = Some(guide);
        }
        Ok(())
    }
}
