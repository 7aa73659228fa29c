use narracut_core::config::{AssemblyConfig, AudioAttachment, EngineConfig, GarbageFallback};
use narracut_core::intervals::{merge_intervals, subtract};
use narracut_core::types::{ScriptSegment, TimeRange, TimeUs};
use narracut_core::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{RenderError, Result};
use crate::media::MediaBackend;
use crate::workspace::Workspace;

/// Published after each finished segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyProgress {
    pub segment: usize,
    pub total: usize,
}

/// How long each segment's clip runs in the output video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Exactly the segment's audio. Footage between narrations is dropped.
    #[default]
    Audio,
    /// From the segment's `startTime` up to the next segment's `startTime`
    /// (the first clip starts at zero), so the output video shares the
    /// placement axis of the master narration.
    Placement,
}

/// Where one segment's visuals come from.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub segment_id: String,
    pub audio_duration: TimeUs,
    /// Length of the finished clip, never shorter than the audio.
    pub length: TimeUs,
    pub window: TimeRange,
    /// Sub-clips taken from the raw video, in order.
    pub cuts: Vec<TimeRange>,
    /// Set when no usable footage was found in the window.
    pub fallback: Option<TimeRange>,
}

impl SegmentPlan {
    pub fn visual_duration(&self) -> TimeUs {
        match self.fallback {
            Some(range) => range.duration(),
            None => self.cuts.iter().map(|c| c.duration()).sum(),
        }
    }

    /// How long the last frame is held to reach the clip length.
    pub fn freeze(&self) -> TimeUs {
        (self.length - self.visual_duration()).max(TimeUs::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Decide, without touching any file, which parts of the raw video feed
/// each kept segment.
///
/// Segment `i` looks at `[timestamp_i, timestamp_next)` (or the end of the
/// video), minus garbage, and never reaches back into the previous segment's
/// window.
pub fn plan_segments(
    segments: &[ScriptSegment],
    cleanup: &[TimeRange],
    video_duration: TimeUs,
    config: &AssemblyConfig,
) -> Result<Vec<SegmentPlan>> {
    plan_segments_with(segments, cleanup, video_duration, config, Pacing::Audio)
}

/// [`plan_segments`] with an explicit clip length rule.
pub fn plan_segments_with(
    segments: &[ScriptSegment],
    cleanup: &[TimeRange],
    video_duration: TimeUs,
    config: &AssemblyConfig,
    pacing: Pacing,
) -> Result<Vec<SegmentPlan>> {
    let garbage = merge_intervals(
        &cleanup
            .iter()
            .map(|c| c.clamp_to(video_duration))
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>(),
        TimeUs::ZERO,
    );
    let kept: Vec<&ScriptSegment> = segments.iter().filter(|s| s.is_kept()).collect();

    let mut plans = Vec::with_capacity(kept.len());
    let mut previous_end = TimeUs::ZERO;
    for (i, segment) in kept.iter().enumerate() {
        let audio_duration = segment
            .audio_duration
            .ok_or_else(|| CoreError::MissingAudioDuration(segment.id.clone()))?;

        let length = match pacing {
            Pacing::Audio => audio_duration,
            Pacing::Placement => {
                let placed = |s: &ScriptSegment| s.start_time.unwrap_or(s.timestamp);
                let from = if i == 0 { TimeUs::ZERO } else { placed(*segment) };
                let until = kept
                    .get(i + 1)
                    .map(|next| placed(*next))
                    .unwrap_or(placed(*segment) + audio_duration);
                (until - from).max(audio_duration)
            }
        };

        let start = match pacing {
            Pacing::Placement if i == 0 => TimeUs::ZERO,
            _ => segment.timestamp.max(previous_end).min(video_duration),
        };
        let end = kept
            .get(i + 1)
            .map(|next| next.timestamp)
            .unwrap_or(video_duration)
            .clamp(start, video_duration);
        let window = TimeRange::new(start, end);
        previous_end = window.end;

        let mut cuts = Vec::new();
        let mut gathered = TimeUs::ZERO;
        for available in subtract(window, &garbage) {
            if gathered >= length {
                break;
            }
            let take = available.duration().min(length - gathered);
            if take < config.min_usable_cut() {
                continue;
            }
            cuts.push(TimeRange::new(available.start, available.start + take));
            gathered = gathered + take;
        }

        let fallback = if cuts.is_empty() {
            let at = match config.garbage_fallback {
                GarbageFallback::NominalTimestamp => segment.timestamp,
                GarbageFallback::SnapForward => snap_forward(segment.timestamp, &garbage),
            };
            let clip = fallback_clip(at, config.fallback_clip(), video_duration);
            warn!(
                segment = %segment.id,
                window = %window,
                clip = %clip,
                "No usable footage in window, using fallback clip"
            );
            Some(clip)
        } else {
            None
        };

        plans.push(SegmentPlan {
            segment_id: segment.id.clone(),
            audio_duration,
            length,
            window,
            cuts,
            fallback,
        });
    }
    Ok(plans)
}

/// First instant at or after `t` outside every garbage range.
fn snap_forward(t: TimeUs, garbage: &[TimeRange]) -> TimeUs {
    let mut t = t;
    for range in garbage {
        if range.contains(t) {
            t = range.end;
        }
    }
    t
}

fn fallback_clip(at: TimeUs, length: TimeUs, video_duration: TimeUs) -> TimeRange {
    let start = at.min(video_duration - length).max(TimeUs::ZERO);
    TimeRange::new(start, (start + length).min(video_duration))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    pub plans: Vec<SegmentPlan>,
    pub output: PathBuf,
    pub duration: TimeUs,
}

pub struct Assembler<'a> {
    backend: &'a dyn MediaBackend,
    config: &'a EngineConfig,
    cancel: CancelToken,
    progress: Option<watch::Sender<AssemblyProgress>>,
    pacing: Pacing,
}

impl<'a> Assembler<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: &'a EngineConfig) -> Self {
        Self {
            backend,
            config,
            cancel: CancelToken::none(),
            progress: None,
            pacing: Pacing::Audio,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
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

    /// Build the final video for the resolved `segments`.
    ///
    /// `audio` maps segment id to its narration file and is only read when
    /// narration is attached per segment. The output file is written only
    /// once every segment succeeded.
    pub fn assemble(
        &self,
        raw_video: &Path,
        segments: &[ScriptSegment],
        cleanup: &[TimeRange],
        audio: &HashMap<String, PathBuf>,
        output: &Path,
    ) -> Result<AssemblyReport> {
        let video_duration = self.backend.probe_duration(raw_video)?;
        let plans = plan_segments_with(
            segments,
            cleanup,
            video_duration,
            &self.config.assembly,
            self.pacing,
        )?;
        if plans.is_empty() {
            return Err(RenderError::NoUsableSegments);
        }

        let workspace = Workspace::new("assemble")?;
        let total = plans.len();
        let mut finals = Vec::with_capacity(total);

        for (idx, plan) in plans.iter().enumerate() {
            self.cancel.check()?;
            finals.push(self.render_segment(raw_video, idx, plan, audio, &workspace)?);
            if let Some(tx) = &self.progress {
                let _ = tx.send(AssemblyProgress {
                    segment: idx + 1,
                    total,
                });
            }
        }

        self.cancel.check()?;
        let joined = workspace.file("final.mp4");
        self.backend.concat_videos(&finals, &joined)?;
        persist(&joined, output)?;

        let duration = self.backend.probe_duration(output)?;
        info!(
            segments = total,
            duration = %duration,
            output = %output.display(),
            "Assembled video"
        );
        Ok(AssemblyReport {
            plans,
            output: output.to_path_buf(),
            duration,
        })
    }

    fn render_segment(
        &self,
        raw_video: &Path,
        idx: usize,
        plan: &SegmentPlan,
        audio: &HashMap<String, PathBuf>,
        workspace: &Workspace,
    ) -> Result<PathBuf> {
        debug!(
            segment = %plan.segment_id,
            cuts = plan.cuts.len(),
            freeze = %plan.freeze(),
            "Rendering segment"
        );

        let base = match plan.fallback {
            Some(range) => {
                let path = workspace.file(format!("base_{idx:03}.mp4"));
                self.backend.cut_video(raw_video, range, &path)?;
                path
            }
            None => {
                let mut clips = Vec::with_capacity(plan.cuts.len());
                for (i, range) in plan.cuts.iter().enumerate() {
                    let path = workspace.file(format!("s_{idx:03}_{i:03}.mp4"));
                    self.backend.cut_video(raw_video, *range, &path)?;
                    clips.push(path);
                }
                if clips.len() == 1 {
                    clips.remove(0)
                } else {
                    let path = workspace.file(format!("base_{idx:03}.mp4"));
                    self.backend.concat_videos(&clips, &path)?;
                    path
                }
            }
        };

        let held = workspace.file(format!("final_{idx:03}.mp4"));
        self.backend
            .freeze_to_duration(&base, plan.length, &held)?;

        match self.config.assembly.audio {
            AudioAttachment::None => Ok(held),
            AudioAttachment::PerSegment => {
                let narration = audio
                    .get(&plan.segment_id)
                    .ok_or_else(|| RenderError::MissingAudioSource(plan.segment_id.clone()))?;
                let with_audio = workspace.file(format!("final_{idx:03}_av.mp4"));
                self.backend.attach_audio(&held, narration, &with_audio)?;
                Ok(with_audio)
            }
        }
    }
}

/// Move a finished file into place, copying when a rename crosses devices.
pub fn persist(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
    }
    Ok(())
}
