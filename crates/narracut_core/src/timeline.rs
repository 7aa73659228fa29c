use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::types::*;

/// A segment that had to be pushed later than its nominal timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collision {
    pub segment_id: String,
    pub nominal: TimeUs,
    pub resolved: TimeUs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTimeline {
    pub segments: Vec<ScriptSegment>,
    pub collisions: Vec<Collision>,
}

/// Place every kept segment at `max(nominal, next_available)` so no two
/// placements overlap, leaving at least `gap` between them.
///
/// `durations` maps segment id to measured audio length. Deleted segments are
/// passed through untouched. Colliding segments get their displayed timestamp
/// rewritten to the resolved start.
pub fn resolve_timeline(
    segments: &[ScriptSegment],
    durations: &HashMap<String, TimeUs>,
    gap: TimeUs,
) -> Result<ResolvedTimeline> {
    let mut resolved = Vec::with_capacity(segments.len());
    let mut collisions = Vec::new();
    let mut next_available = TimeUs::ZERO;

    for segment in segments {
        let mut segment = segment.clone();
        if !segment.is_kept() {
            resolved.push(segment);
            continue;
        }

        let duration = *durations
            .get(&segment.id)
            .ok_or_else(|| CoreError::MissingAudioDuration(segment.id.clone()))?;

        let nominal = segment.timestamp;
        let start = nominal.max(next_available);
        if start != nominal {
            collisions.push(Collision {
                segment_id: segment.id.clone(),
                nominal,
                resolved: start,
            });
            segment.timestamp = start;
        }

        let end = start + duration;
        segment.start_time = Some(start);
        segment.end_time = Some(end);
        segment.audio_duration = Some(duration);
        next_available = end + gap;

        resolved.push(segment);
    }

    if collisions.is_empty() {
        info!("No audio collisions detected");
    } else {
        warn!(count = collisions.len(), "Fixed overlapping segments");
    }

    Ok(ResolvedTimeline {
        segments: resolved,
        collisions,
    })
}

/// Durations keyed by segment id, from measured audio assets.
pub fn durations_by_segment(assets: &[AudioAsset]) -> HashMap<String, TimeUs> {
    assets
        .iter()
        .map(|a| (a.segment_id.clone(), a.duration))
        .collect()
}

/// Fill `narrationStart`/`narrationEnd` as a running sum of audio + pause over
/// kept segments. Source-video placement (`startTime`/`endTime`) is left alone.
pub fn compute_narration_timeline(segments: &[ScriptSegment]) -> Vec<ScriptSegment> {
    let mut cursor = TimeUs::ZERO;
    segments
        .iter()
        .map(|segment| {
            let mut segment = segment.clone();
            if segment.is_kept() {
                let end = cursor + segment.audio_duration_or_zero() + segment.pause_duration;
                segment.narration_start = Some(cursor);
                segment.narration_end = Some(end);
                cursor = end;
            } else {
                segment.narration_start = None;
                segment.narration_end = None;
            }
            segment
        })
        .collect()
}

/// Ordered view of the narration axis as currently recorded on the segments.
pub fn narration_timeline(segments: &[ScriptSegment]) -> NarrationTimeline {
    let entries: Vec<NarrationEntry> = segments
        .iter()
        .filter(|s| s.is_kept())
        .filter_map(|s| match (s.narration_start, s.narration_end) {
            (Some(start), Some(end)) => Some(NarrationEntry {
                segment_id: s.id.clone(),
                start,
                end,
            }),
            _ => None,
        })
        .collect();
    let total = entries.last().map(|e| e.end).unwrap_or(TimeUs::ZERO);
    NarrationTimeline { entries, total }
}

fn summed_narration(segments: &[ScriptSegment]) -> TimeUs {
    segments
        .iter()
        .filter(|s| s.is_kept())
        .map(|s| s.audio_duration_or_zero() + s.pause_duration)
        .sum()
}

/// Narration length: the latest `narrationEnd` when every kept segment has
/// one, otherwise the summed audio + pause durations.
pub fn narration_duration(segments: &[ScriptSegment]) -> TimeUs {
    let kept: Vec<&ScriptSegment> = segments.iter().filter(|s| s.is_kept()).collect();
    if kept.is_empty() {
        return TimeUs::ZERO;
    }
    if kept.iter().all(|s| s.narration_end.is_some()) {
        return kept
            .iter()
            .filter_map(|s| s.narration_end)
            .max()
            .unwrap_or(TimeUs::ZERO);
    }
    summed_narration(segments)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarrationCheck {
    pub expected: TimeUs,
    pub computed: TimeUs,
    pub consistent: bool,
}

/// Compare the narration end against the independently summed durations.
/// A mismatch is logged, never raised.
pub fn validate_narration_timeline(segments: &[ScriptSegment], tolerance: TimeUs) -> NarrationCheck {
    let expected = summed_narration(segments);
    let computed = narration_duration(segments);
    let consistent = expected.abs_diff(computed) <= tolerance;

    if consistent {
        info!(duration = %computed, "Narration duration validated");
    } else {
        warn!(
            expected = %expected,
            computed = %computed,
            "Narration duration mismatch detected"
        );
    }

    NarrationCheck {
        expected,
        computed,
        consistent,
    }
}
