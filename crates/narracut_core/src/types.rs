use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::path::PathBuf;

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// TimeUs
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct TimeUs(pub i64);

impl TimeUs {
    pub const ZERO: Self = Self(0);

    /// Rounds to the nearest microsecond, so `3.3` lands on `3_300_000`.
    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000_000.0).round() as i64)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Seconds rounded to milliseconds, for summaries and logs.
    pub fn as_seconds_ms(&self) -> f64 {
        (self.0 as f64 / 1_000.0).round() / 1_000.0
    }

    pub fn abs_diff(self, other: Self) -> Self {
        Self((self.0 - other.0).abs())
    }
}

impl Add for TimeUs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeUs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<i64> for TimeUs {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i64> for TimeUs {
    type Output = Self;
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl std::iter::Sum for TimeUs {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(TimeUs::ZERO, |acc, t| acc + t)
    }
}

impl fmt::Display for TimeUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_us = self.0.unsigned_abs();
        let total_ms = total_us / 1_000;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp strings
// ---------------------------------------------------------------------------

/// Parse `SS`, `MM:SS` or `HH:MM:SS` (fractional seconds allowed). Empty is zero.
pub fn parse_timestamp(ts: &str) -> Result<TimeUs> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Ok(TimeUs::ZERO);
    }

    let parts = ts
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| CoreError::InvalidTimestamp(ts.to_string()))?;
    if parts.iter().any(|p| p.is_sign_negative()) {
        return Err(CoreError::InvalidTimestamp(ts.to_string()));
    }

    let seconds = match parts.as_slice() {
        [s] => *s,
        [m, s] => m * 60.0 + s,
        [h, m, s] => h * 3600.0 + m * 60.0 + s,
        _ => return Err(CoreError::InvalidTimestamp(ts.to_string())),
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(CoreError::InvalidTimestamp(ts.to_string()));
    }
    Ok(TimeUs::from_seconds(seconds))
}

/// Render as `MM:SS.ss`, or `HH:MM:SS.ss` from one hour on. Sub-centisecond
/// digits are kept, so parsing the result gives back the same instant.
pub fn format_timestamp(t: TimeUs) -> String {
    let us = t.0.max(0);
    let total_secs = us / 1_000_000;
    let total_mins = total_secs / 60;

    let digits = format!("{:06}", us % 1_000_000);
    let frac = digits.trim_end_matches('0');
    let frac = if frac.len() < 2 { &digits[..2] } else { frac };

    if total_mins >= 60 {
        format!(
            "{:02}:{:02}:{:02}.{frac}",
            total_mins / 60,
            total_mins % 60,
            total_secs % 60
        )
    } else {
        format!("{:02}:{:02}.{frac}", total_mins, total_secs % 60)
    }
}

// ---------------------------------------------------------------------------
// Serde helpers (seconds at the JSON boundary, microsecond exact)
// ---------------------------------------------------------------------------

pub mod secs {
    use super::TimeUs;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &TimeUs, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(t.as_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeUs, D::Error> {
        Ok(TimeUs::from_seconds(f64::deserialize(d)?))
    }
}

pub mod opt_secs {
    use super::TimeUs;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<TimeUs>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_some(&t.as_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TimeUs>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.map(TimeUs::from_seconds))
    }
}

pub mod timestamp_str {
    use super::{format_timestamp, parse_timestamp, TimeUs};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(f64),
    }

    pub fn serialize<S: Serializer>(t: &TimeUs, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeUs, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(text) => parse_timestamp(&text).map_err(D::Error::custom),
            Raw::Seconds(s) => Ok(TimeUs::from_seconds(s)),
        }
    }
}

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRange {
    pub start: TimeUs,
    pub end: TimeUs,
}

impl TimeRange {
    /// An inverted pair collapses to an empty range at `start`.
    pub fn new(start: TimeUs, end: TimeUs) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn from_seconds(start: f64, end: f64) -> Self {
        Self::new(TimeUs::from_seconds(start), TimeUs::from_seconds(end))
    }

    pub fn duration(&self) -> TimeUs {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, t: TimeUs) -> bool {
        self.start <= t && t < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn clamp_to(&self, total: TimeUs) -> TimeRange {
        let start = self.start.max(TimeUs::ZERO).min(total);
        let end = self.end.max(TimeUs::ZERO).min(total);
        TimeRange::new(start, end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}s, {:.3}s)", self.start.as_seconds(), self.end.as_seconds())
    }
}

// ---------------------------------------------------------------------------
// CleanupRange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    NoInteraction,
    BackgroundNoise,
    Mistake,
    Freeze,
    Silence,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupRange {
    #[serde(rename = "startTime", alias = "start_time", with = "timestamp_str")]
    pub start: TimeUs,
    #[serde(rename = "endTime", alias = "end_time", with = "timestamp_str")]
    pub end: TimeUs,
    #[serde(default)]
    pub reason: CleanupReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CleanupRange {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// ScriptSegment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordSpan {
    pub word: String,
    #[serde(with = "secs")]
    pub start: TimeUs,
    #[serde(with = "secs")]
    pub end: TimeUs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSegment {
    #[serde(default)]
    pub id: String,
    #[serde(with = "timestamp_str")]
    pub timestamp: TimeUs,
    #[serde(alias = "voiceover_text")]
    pub voiceover_text: String,
    #[serde(default, alias = "pause_duration", with = "secs")]
    pub pause_duration: TimeUs,
    #[serde(default, alias = "audio_duration", with = "opt_secs")]
    pub audio_duration: Option<TimeUs>,
    #[serde(default, alias = "start_time", with = "opt_secs")]
    pub start_time: Option<TimeUs>,
    #[serde(default, alias = "end_time", with = "opt_secs")]
    pub end_time: Option<TimeUs>,
    #[serde(default, alias = "narration_start", with = "opt_secs")]
    pub narration_start: Option<TimeUs>,
    #[serde(default, alias = "narration_end", with = "opt_secs")]
    pub narration_end: Option<TimeUs>,
    #[serde(default, alias = "audio_url")]
    pub audio_url: Option<String>,
    #[serde(default, alias = "is_deleted")]
    pub is_deleted: bool,
    #[serde(default, alias = "ui_element", skip_serializing_if = "Option::is_none")]
    pub ui_element: Option<String>,
    #[serde(default, alias = "user_action", skip_serializing_if = "Option::is_none")]
    pub user_action: Option<String>,
    #[serde(default, alias = "word_spans", skip_serializing_if = "Vec::is_empty")]
    pub word_spans: Vec<WordSpan>,
}

impl ScriptSegment {
    pub fn new(id: impl Into<String>, timestamp: TimeUs, voiceover_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            voiceover_text: voiceover_text.into(),
            pause_duration: TimeUs::ZERO,
            audio_duration: None,
            start_time: None,
            end_time: None,
            narration_start: None,
            narration_end: None,
            audio_url: None,
            is_deleted: false,
            ui_element: None,
            user_action: None,
            word_spans: vec![],
        }
    }

    pub fn is_kept(&self) -> bool {
        !self.is_deleted
    }

    pub fn audio_duration_or_zero(&self) -> TimeUs {
        self.audio_duration.unwrap_or(TimeUs::ZERO)
    }

    /// `[startTime, endTime)` once the segment has been placed.
    pub fn placement(&self) -> Option<TimeRange> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(TimeRange::new(start, end)),
            _ => None,
        }
    }
}

/// Replacement voiceover text for one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentEdit {
    pub id: String,
    #[serde(alias = "voiceover_text")]
    pub voiceover_text: String,
}

// ---------------------------------------------------------------------------
// AudioAsset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioAsset {
    pub segment_id: String,
    pub local_path: PathBuf,
    pub duration: TimeUs,
}

// ---------------------------------------------------------------------------
// NarrationTimeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrationEntry {
    pub segment_id: String,
    pub start: TimeUs,
    pub end: TimeUs,
}

/// Output-audio time axis of the kept segments, in script order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NarrationTimeline {
    pub entries: Vec<NarrationEntry>,
    pub total: TimeUs,
}

impl NarrationTimeline {
    pub fn is_contiguous(&self) -> bool {
        let starts_at_zero = self.entries.first().map_or(true, |e| e.start == TimeUs::ZERO);
        let chained = self.entries.windows(2).all(|w| w[0].end == w[1].start);
        let total_matches = self.entries.last().map_or(self.total == TimeUs::ZERO, |e| e.end == self.total);
        starts_at_zero && chained && total_matches
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_us_add_sub() {
        let a = TimeUs(5_000_000);
        let b = TimeUs(3_000_000);
        assert_eq!(a + b, TimeUs(8_000_000));
        assert_eq!(a - b, TimeUs(2_000_000));
        assert_eq!(b.abs_diff(a), TimeUs(2_000_000));
    }

    #[test]
    fn time_us_from_seconds_rounds() {
        assert_eq!(TimeUs::from_seconds(3.3), TimeUs(3_300_000));
        assert_eq!(TimeUs::from_seconds(4.6), TimeUs(4_600_000));
        assert!((TimeUs(2_500_000).as_seconds() - 2.5).abs() < 1e-9);
        assert_eq!(TimeUs(1_234_567).as_seconds_ms(), 1.235);
    }

    #[test]
    fn time_us_display() {
        assert_eq!(TimeUs(0).to_string(), "00:00:00.000");
        assert_eq!(TimeUs::from_seconds(3661.5).to_string(), "01:01:01.500");
    }

    #[test]
    fn time_us_sum() {
        let total: TimeUs = [TimeUs(1), TimeUs(2), TimeUs(3)].into_iter().sum();
        assert_eq!(total, TimeUs(6));
    }

    #[test]
    fn parse_timestamp_forms() {
        assert_eq!(parse_timestamp("0:02").unwrap(), TimeUs::from_seconds(2.0));
        assert_eq!(parse_timestamp("01:15.5").unwrap(), TimeUs::from_seconds(75.5));
        assert_eq!(parse_timestamp("1:02:05").unwrap(), TimeUs::from_seconds(3725.0));
        assert_eq!(parse_timestamp("12.25").unwrap(), TimeUs::from_seconds(12.25));
        assert_eq!(parse_timestamp("").unwrap(), TimeUs::ZERO);
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("ab:cd").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
        assert!(parse_timestamp("-00:05").is_err());
    }

    #[test]
    fn format_timestamp_forms() {
        assert_eq!(format_timestamp(TimeUs::from_seconds(3.3)), "00:03.30");
        assert_eq!(format_timestamp(TimeUs::from_seconds(75.5)), "01:15.50");
        assert_eq!(format_timestamp(TimeUs::from_seconds(3725.25)), "01:02:05.25");
        assert_eq!(format_timestamp(TimeUs(2_563_000)), "00:02.563");
        assert_eq!(format_timestamp(TimeUs(1_000_001)), "00:01.000001");
        assert_eq!(
            parse_timestamp(&format_timestamp(TimeUs::from_seconds(4.6))).unwrap(),
            TimeUs::from_seconds(4.6)
        );
    }

    #[test]
    fn timing_fields_survive_json_exactly() {
        let mut seg = ScriptSegment::new("s1", TimeUs(2_563_417), "Hello");
        seg.start_time = Some(TimeUs(2_563_417));
        seg.audio_duration = Some(TimeUs(1_333_333));
        seg.word_spans = vec![WordSpan {
            word: "Hello".into(),
            start: TimeUs(0),
            end: TimeUs(333_333),
        }];

        let json = serde_json::to_string(&seg).unwrap();
        let back: ScriptSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seg);
    }

    #[test]
    fn time_range_overlap_and_clamp() {
        let a = TimeRange::from_seconds(1.0, 3.0);
        let b = TimeRange::from_seconds(3.0, 4.0);
        let c = TimeRange::from_seconds(2.0, 5.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(a.contains(TimeUs::from_seconds(1.0)));
        assert!(!a.contains(TimeUs::from_seconds(3.0)));

        let clamped = TimeRange::from_seconds(-1.0, 12.0).clamp_to(TimeUs::from_seconds(10.0));
        assert_eq!(clamped, TimeRange::from_seconds(0.0, 10.0));
        assert!(TimeRange::from_seconds(5.0, 2.0).is_empty());
    }

    #[test]
    fn segment_accepts_generator_snake_case() {
        let json = r#"{
            "id": "s1",
            "timestamp": "00:02",
            "ui_element": "Save button",
            "user_action": "Clicks save",
            "voiceover_text": "Saving keeps your changes.",
            "pause_duration": 0.6
        }"#;
        let seg: ScriptSegment = serde_json::from_str(json).unwrap();
        assert_eq!(seg.timestamp, TimeUs::from_seconds(2.0));
        assert_eq!(seg.pause_duration, TimeUs::from_seconds(0.6));
        assert_eq!(seg.audio_duration, None);
        assert_eq!(seg.ui_element.as_deref(), Some("Save button"));
        assert!(seg.is_kept());
    }

    #[test]
    fn segment_serializes_camel_case_timing_fields() {
        let mut seg = ScriptSegment::new("s1", TimeUs::from_seconds(3.3), "Hello");
        seg.start_time = Some(TimeUs::from_seconds(3.3));
        seg.end_time = Some(TimeUs::from_seconds(4.3));
        seg.audio_duration = Some(TimeUs::from_seconds(1.0));

        let value = serde_json::to_value(&seg).unwrap();
        assert_eq!(value["timestamp"], "00:03.30");
        assert_eq!(value["startTime"], 3.3);
        assert_eq!(value["endTime"], 4.3);
        assert_eq!(value["audioDuration"], 1.0);
        assert!(value["narrationStart"].is_null());
        assert!(value.get("narrationEnd").is_some());
        assert!(value.get("audioUrl").is_some());
        assert_eq!(value["isDeleted"], false);

        let back: ScriptSegment = serde_json::from_value(value).unwrap();
        assert_eq!(back, seg);
    }

    #[test]
    fn cleanup_range_parses_timestamps_and_unknown_reason() {
        let json = r#"[
            {"start_time": "00:10", "end_time": "00:15", "reason": "no_interaction"},
            {"startTime": "01:00", "endTime": "01:02.5", "reason": "cat_walked_by"}
        ]"#;
        let ranges: Vec<CleanupRange> = serde_json::from_str(json).unwrap();
        assert_eq!(ranges[0].range(), TimeRange::from_seconds(10.0, 15.0));
        assert_eq!(ranges[0].reason, CleanupReason::NoInteraction);
        assert_eq!(ranges[1].range(), TimeRange::from_seconds(60.0, 62.5));
        assert_eq!(ranges[1].reason, CleanupReason::Other);
    }

    #[test]
    fn narration_timeline_contiguity() {
        let timeline = NarrationTimeline {
            entries: vec![
                NarrationEntry {
                    segment_id: "a".into(),
                    start: TimeUs(0),
                    end: TimeUs(2_000_000),
                },
                NarrationEntry {
                    segment_id: "b".into(),
                    start: TimeUs(2_000_000),
                    end: TimeUs(3_500_000),
                },
            ],
            total: TimeUs(3_500_000),
        };
        assert!(timeline.is_contiguous());

        let mut broken = timeline.clone();
        broken.entries[1].start = TimeUs(2_100_000);
        assert!(!broken.is_contiguous());
    }
}
