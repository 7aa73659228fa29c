use crate::error::{CoreError, Result};
use crate::types::TimeUs;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the engine needs to know, passed in at construction.
/// Durations are plain seconds so the JSON file stays readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub timeline: TimelineConfig,
    pub padding: CutPadding,
    pub detection: DetectionConfig,
    pub assembly: AssemblyConfig,
    pub video_encode: VideoEncode,
    pub audio_encode: AudioEncode,
    pub storage: StorageConfig,
    pub layout: CanvasLayout,
}

impl EngineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(CoreError::Io)?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("timeline.collision_gap", self.timeline.collision_gap),
            ("timeline.narration_tolerance", self.timeline.narration_tolerance),
            ("timeline.invariant_tolerance", self.timeline.invariant_tolerance),
            ("padding.before", self.padding.before),
            ("padding.after", self.padding.after),
            ("padding.min_cut", self.padding.min_cut),
            ("padding.merge_gap", self.padding.merge_gap),
            ("assembly.min_usable_cut", self.assembly.min_usable_cut),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidOperation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.assembly.fallback_clip <= 0.0 {
            return Err(CoreError::InvalidOperation(
                "assembly.fallback_clip must be positive".into(),
            ));
        }
        if self.assembly.workers == 0 {
            return Err(CoreError::InvalidOperation(
                "assembly.workers must be at least 1".into(),
            ));
        }
        if self.layout.margin.saturating_mul(2) >= self.layout.canvas_width.min(self.layout.canvas_height) {
            return Err(CoreError::InvalidOperation(
                "layout.margin leaves no room on the canvas".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    /// Minimum silence between two placed segments.
    pub collision_gap: f64,
    /// Narration end vs summed durations, warning threshold.
    pub narration_tolerance: f64,
    /// Master duration vs last segment end, hard limit after a rebuild.
    pub invariant_tolerance: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            collision_gap: 0.3,
            narration_tolerance: 0.05,
            invariant_tolerance: 0.01,
        }
    }
}

impl TimelineConfig {
    pub fn collision_gap(&self) -> TimeUs {
        TimeUs::from_seconds(self.collision_gap)
    }

    pub fn narration_tolerance(&self) -> TimeUs {
        TimeUs::from_seconds(self.narration_tolerance)
    }

    pub fn invariant_tolerance(&self) -> TimeUs {
        TimeUs::from_seconds(self.invariant_tolerance)
    }
}

// ---------------------------------------------------------------------------
// Cut padding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CutPadding {
    pub before: f64,
    pub after: f64,
    pub min_cut: f64,
    pub merge_gap: f64,
}

impl Default for CutPadding {
    fn default() -> Self {
        Self {
            before: 0.20,
            after: 0.35,
            min_cut: 0.50,
            merge_gap: 0.05,
        }
    }
}

impl CutPadding {
    pub fn before(&self) -> TimeUs {
        TimeUs::from_seconds(self.before)
    }

    pub fn after(&self) -> TimeUs {
        TimeUs::from_seconds(self.after)
    }

    pub fn min_cut(&self) -> TimeUs {
        TimeUs::from_seconds(self.min_cut)
    }

    pub fn merge_gap(&self) -> TimeUs {
        TimeUs::from_seconds(self.merge_gap)
    }
}

// ---------------------------------------------------------------------------
// Dead-zone detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub freeze_noise: f64,
    pub freeze_min: f64,
    pub silence_db: f64,
    pub silence_min: f64,
    /// Keep ranges shorter than this are not exported in trim mode.
    pub min_keep_segment: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            freeze_noise: 0.001,
            freeze_min: 0.50,
            silence_db: -35.0,
            silence_min: 0.50,
            min_keep_segment: 0.40,
        }
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Whether narration audio is muxed into the assembled video.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioAttachment {
    /// Video only; the master narration file is the audio deliverable.
    #[default]
    None,
    /// Each segment clip carries its own narration, padded to the clip length.
    PerSegment,
}

/// Where the minimal clip is taken when a segment has no usable footage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GarbageFallback {
    /// At the nominal timestamp, even when it lies inside a cleanup range.
    #[default]
    NominalTimestamp,
    /// At the first instant after the cleanup range covering the timestamp.
    SnapForward,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblyConfig {
    pub min_usable_cut: f64,
    pub fallback_clip: f64,
    pub audio: AudioAttachment,
    pub garbage_fallback: GarbageFallback,
    /// Upper bound on concurrent probe/synthesis jobs.
    pub workers: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            min_usable_cut: 0.05,
            fallback_clip: 0.10,
            audio: AudioAttachment::None,
            garbage_fallback: GarbageFallback::NominalTimestamp,
            workers: 4,
        }
    }
}

impl AssemblyConfig {
    pub fn min_usable_cut(&self) -> TimeUs {
        TimeUs::from_seconds(self.min_usable_cut)
    }

    pub fn fallback_clip(&self) -> TimeUs {
        TimeUs::from_seconds(self.fallback_clip)
    }
}

// ---------------------------------------------------------------------------
// Encode parameters (identical for every intermediate clip of a run)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoEncode {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for VideoEncode {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            preset: "ultrafast".into(),
            crf: 23,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioEncode {
    pub sample_rate: u32,
    pub channels: u32,
    pub master_codec: String,
    pub master_bitrate: String,
    pub master_extension: String,
    pub attach_codec: String,
    pub attach_bitrate: String,
    pub attach_sample_rate: u32,
}

impl Default for AudioEncode {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            master_codec: "libmp3lame".into(),
            master_bitrate: "128k".into(),
            master_extension: "mp3".into(),
            attach_codec: "aac".into(),
            attach_bitrate: "192k".into(),
            attach_sample_rate: 48_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Used when a record carries no URL to infer the bucket from.
    pub bucket: String,
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "narracut-storage".into(),
            prefix: "processed".into(),
        }
    }
}

impl StorageConfig {
    pub fn project_key(&self, project_id: &str, file_name: &str) -> String {
        format!("{}/{project_id}/{file_name}", self.prefix)
    }

    pub fn voiceover_key(&self, project_id: &str, file_name: &str) -> String {
        format!("{}/{project_id}/voiceovers/{file_name}", self.prefix)
    }

    pub fn docs_key(&self, project_id: &str, file_name: &str) -> String {
        format!("{}/{project_id}/docs/{file_name}", self.prefix)
    }
}

// ---------------------------------------------------------------------------
// Background canvas
// ---------------------------------------------------------------------------

/// Canvas a recording is composited onto, in pixels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CanvasLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Kept clear on every side of the scaled recording.
    pub margin: u32,
}

impl Default for CanvasLayout {
    fn default() -> Self {
        Self {
            canvas_width: 1920,
            canvas_height: 1080,
            margin: 160,
        }
    }
}
