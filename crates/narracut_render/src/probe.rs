use narracut_core::types::TimeUs;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RenderError, Result};

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// What the engine needs to know about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: TimeUs,
    pub has_video: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub audio_codec: Option<String>,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run ffprobe on a media file.
pub fn probe_media(path: impl AsRef<Path>) -> Result<MediaInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| RenderError::FfprobeExec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::FfprobeFailed(format!(
            "{}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    Ok(parse_probe_output(&probe))
}

/// Measured container duration. The synthesizer's own estimate is never used.
pub fn probe_duration(path: impl AsRef<Path>) -> Result<TimeUs> {
    let path = path.as_ref();
    let info = probe_media(path)?;
    if info.duration <= TimeUs::ZERO {
        return Err(RenderError::FfprobeFailed(format!(
            "{}: no duration reported",
            path.display()
        )));
    }
    Ok(info.duration)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_probe_output(probe: &FfprobeOutput) -> MediaInfo {
    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .map(TimeUs::from_seconds)
        .unwrap_or(TimeUs::ZERO);

    MediaInfo {
        duration,
        has_video: video_stream.is_some(),
        has_audio: audio_stream.is_some(),
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        fps: video_stream
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        audio_sample_rate: audio_stream
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|r| r.parse::<u32>().ok())
            .unwrap_or(0),
        audio_channels: audio_stream.and_then(|s| s.channels).unwrap_or(0),
    }
}

/// Parse ffprobe frame rate string like "30000/1001" or "30/1" into f64.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d == 0.0 {
            return None;
        }
        Some(n / d)
    } else {
        rate.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
