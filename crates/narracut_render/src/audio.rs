use narracut_core::types::{ScriptSegment, TimeUs};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::workspace::Workspace;

/// One piece of a master narration file.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterPart {
    Clip { segment_id: String, path: PathBuf },
    Silence(TimeUs),
}

/// Layout where every kept segment's clip sits exactly at `[startTime, endTime)`
/// with silence before the first placement and in the gaps.
///
/// `clips` maps segment id to intermediate-format audio.
pub fn placed_layout(
    segments: &[ScriptSegment],
    clips: &HashMap<String, PathBuf>,
) -> Result<Vec<MasterPart>> {
    let mut parts = Vec::new();
    let mut cursor = TimeUs::ZERO;
    for segment in segments.iter().filter(|s| s.is_kept()) {
        let placement = segment
            .placement()
            .ok_or_else(|| RenderError::MissingAudioSource(segment.id.clone()))?;
        let path = clips
            .get(&segment.id)
            .ok_or_else(|| RenderError::MissingAudioSource(segment.id.clone()))?;

        let gap = placement.start - cursor;
        if gap > TimeUs::ZERO {
            parts.push(MasterPart::Silence(gap));
        }
        parts.push(MasterPart::Clip {
            segment_id: segment.id.clone(),
            path: path.clone(),
        });
        cursor = cursor.max(placement.end);
    }
    Ok(parts)
}

/// Render silences, join everything in the intermediate format and encode the
/// master. Returns the measured length of the joined PCM, which excludes the
/// encoder's priming and frame padding.
pub fn write_master(
    backend: &dyn MediaBackend,
    parts: &[MasterPart],
    workspace: &Workspace,
    output: &Path,
) -> Result<TimeUs> {
    if parts.is_empty() {
        return Err(RenderError::NoUsableSegments);
    }

    let mut files = Vec::with_capacity(parts.len());
    for (idx, part) in parts.iter().enumerate() {
        match part {
            MasterPart::Clip { path, .. } => files.push(path.clone()),
            MasterPart::Silence(duration) => {
                let path = workspace.file(format!("silence_{idx:03}.wav"));
                backend.make_silence(*duration, &path)?;
                files.push(path);
            }
        }
    }

    let joined = workspace.file("master_joined.wav");
    backend.concat_audio(&files, &joined)?;
    let duration = backend.probe_duration(&joined)?;

    debug!(parts = files.len(), duration = %duration, "Encoding master narration");
    backend.encode_master(&joined, output)?;
    info!(duration = %duration, output = %output.display(), "Wrote master narration");
    Ok(duration)
}
