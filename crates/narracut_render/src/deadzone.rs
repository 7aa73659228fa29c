use narracut_core::config::EngineConfig;
use narracut_core::intervals::{apply_padding, intersect, invert_to_keep, merge_intervals, total_length};
use narracut_core::types::{TimeRange, TimeUs};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::assemble::persist;
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::workspace::Workspace;

struct DetectorPattern {
    start: Regex,
    end: Regex,
    duration: Regex,
}

impl DetectorPattern {
    fn new(key: &str) -> Self {
        let compile = |pattern: String| Regex::new(&pattern).expect("detector pattern is valid");
        Self {
            start: compile(format!(r"{key}_start:\s*([0-9.]+)")),
            end: compile(format!(r"{key}_end:\s*([0-9.]+)")),
            duration: compile(format!(r"{key}_duration:\s*([0-9.]+)")),
        }
    }
}

static FREEZE: Lazy<DetectorPattern> = Lazy::new(|| DetectorPattern::new("freeze"));
static SILENCE: Lazy<DetectorPattern> = Lazy::new(|| DetectorPattern::new("silence"));

fn capture_seconds(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Pair `*_start` lines with the following `*_end` lines, first in first out.
///
/// The duration is read from the end line when present (silencedetect), and
/// derived from the pair otherwise (freezedetect prints it on its own line).
/// A start left open at the end of the log is closed at `total` when known.
fn parse_detector(
    pattern: &DetectorPattern,
    text: &str,
    min_duration: TimeUs,
    total: Option<TimeUs>,
) -> Vec<TimeRange> {
    let mut starts: VecDeque<TimeUs> = VecDeque::new();
    let mut found = Vec::new();

    for line in text.lines() {
        if let Some(start) = capture_seconds(&pattern.start, line) {
            starts.push_back(TimeUs::from_seconds(start));
        }
        let Some(end) = capture_seconds(&pattern.end, line) else {
            continue;
        };
        let Some(start) = starts.pop_front() else {
            continue;
        };
        let end = TimeUs::from_seconds(end);
        let duration = capture_seconds(&pattern.duration, line)
            .map(TimeUs::from_seconds)
            .unwrap_or(end - start);
        if duration >= min_duration {
            found.push(TimeRange::new(start, end));
        }
    }

    if let (Some(start), Some(total)) = (starts.pop_front(), total) {
        if total - start >= min_duration {
            found.push(TimeRange::new(start, total));
        }
    }
    found
}

/// Visual-freeze intervals from `freezedetect` output.
pub fn parse_freezedetect(text: &str, min_duration: TimeUs, total: Option<TimeUs>) -> Vec<TimeRange> {
    parse_detector(&FREEZE, text, min_duration, total)
}

/// Audio-silence intervals from `silencedetect` output.
pub fn parse_silencedetect(text: &str, min_duration: TimeUs, total: Option<TimeUs>) -> Vec<TimeRange> {
    parse_detector(&SILENCE, text, min_duration, total)
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DeadZones {
    pub duration: TimeUs,
    pub freezes: Vec<TimeRange>,
    /// `None` when the input has no audio stream.
    pub silences: Option<Vec<TimeRange>>,
}

impl DeadZones {
    /// Raw cut ranges: frozen and silent at once, or just frozen when there
    /// is no audio to listen to.
    pub fn cuts(&self) -> Vec<TimeRange> {
        match &self.silences {
            Some(silences) => intersect(&self.freezes, silences),
            None => merge_intervals(&self.freezes, TimeUs::ZERO),
        }
    }

    /// Padded, merged, inverted: what stays in the trimmed video.
    pub fn keep_ranges(&self, config: &EngineConfig) -> Vec<TimeRange> {
        let padded = apply_padding(&self.cuts(), self.duration, &config.padding);
        invert_to_keep(&padded, self.duration, config.padding.merge_gap())
    }
}

/// Run both detectors on `input`.
pub fn detect_dead_zones(
    backend: &dyn MediaBackend,
    input: &Path,
    config: &EngineConfig,
) -> Result<DeadZones> {
    let info = backend.probe(input)?;
    let detection = &config.detection;

    let freeze_log = backend.detect_freezes(input, detection.freeze_noise, detection.freeze_min)?;
    let freezes = parse_freezedetect(
        &freeze_log,
        TimeUs::from_seconds(detection.freeze_min),
        Some(info.duration),
    );

    let silences = if info.has_audio {
        let silence_log =
            backend.detect_silences(input, detection.silence_db, detection.silence_min)?;
        Some(parse_silencedetect(
            &silence_log,
            TimeUs::from_seconds(detection.silence_min),
            Some(info.duration),
        ))
    } else {
        warn!(input = %input.display(), "No audio stream, trimming on freezes alone");
        None
    };

    info!(
        freezes = freezes.len(),
        silences = silences.as_ref().map_or(0, Vec::len),
        "Dead-zone detection finished"
    );

    Ok(DeadZones {
        duration: info.duration,
        freezes,
        silences,
    })
}

// ---------------------------------------------------------------------------
// Trim mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TrimReport {
    pub input_duration: TimeUs,
    pub kept: Vec<TimeRange>,
    pub removed: TimeUs,
}

/// Export every keep range at least `min_keep_segment` long, then join them.
/// `output` is only written once the join succeeded.
pub fn export_segments(
    backend: &dyn MediaBackend,
    input: &Path,
    keep: &[TimeRange],
    output: &Path,
    config: &EngineConfig,
) -> Result<Vec<TimeRange>> {
    let min_keep = TimeUs::from_seconds(config.detection.min_keep_segment);
    let workspace = Workspace::new("trim")?;

    let mut exported = Vec::new();
    let mut files: Vec<PathBuf> = Vec::new();
    for (idx, range) in keep.iter().enumerate() {
        if range.duration() < min_keep {
            continue;
        }
        let clip = workspace.file(format!("seg_{idx:04}.mp4"));
        backend.export_clip(input, *range, &clip)?;
        files.push(clip);
        exported.push(*range);
    }

    if files.is_empty() {
        return Err(RenderError::NoUsableSegments);
    }
    let joined = workspace.file("trimmed.mp4");
    backend.concat_videos(&files, &joined)?;
    persist(&joined, output)?;
    Ok(exported)
}

/// Detect dead zones in `input` and write the trimmed result to `output`.
pub fn trim_dead_zones(
    backend: &dyn MediaBackend,
    input: &Path,
    output: &Path,
    config: &EngineConfig,
) -> Result<TrimReport> {
    let zones = detect_dead_zones(backend, input, config)?;
    let keep = zones.keep_ranges(config);
    let kept = export_segments(backend, input, &keep, output, config)?;

    let removed = zones.duration - total_length(&kept);
    info!(
        kept = kept.len(),
        removed = %removed,
        output = %output.display(),
        "Trimmed dead zones"
    );

    Ok(TrimReport {
        input_duration: zones.duration,
        kept,
        removed,
    })
}
