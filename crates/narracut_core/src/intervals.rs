use crate::config::CutPadding;
use crate::types::*;

/// Merge ranges whose start falls within `gap_tolerance` of the running end.
/// Output is disjoint and ascending.
pub fn merge_intervals(ranges: &[TimeRange], gap_tolerance: TimeUs) -> Vec<TimeRange> {
    let mut sorted: Vec<TimeRange> = ranges.to_vec();
    sorted.sort();

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(current) if range.start <= current.end + gap_tolerance => {
                current.end = current.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Complement of the (clamped, merged) cut ranges within `[0, total]`.
pub fn invert_to_keep(cuts: &[TimeRange], total: TimeUs, gap_tolerance: TimeUs) -> Vec<TimeRange> {
    let clamped: Vec<TimeRange> = cuts
        .iter()
        .map(|c| c.clamp_to(total))
        .filter(|c| !c.is_empty())
        .collect();

    let mut keep = Vec::new();
    let mut cursor = TimeUs::ZERO;
    for cut in merge_intervals(&clamped, gap_tolerance) {
        if cut.start > cursor {
            keep.push(TimeRange::new(cursor, cut.start));
        }
        cursor = cursor.max(cut.end);
    }
    if cursor < total {
        keep.push(TimeRange::new(cursor, total));
    }
    keep
}

/// Widen each cut by the configured padding, clamp to `[0, total]`, drop cuts
/// shorter than `min_cut`, then re-merge.
pub fn apply_padding(cuts: &[TimeRange], total: TimeUs, padding: &CutPadding) -> Vec<TimeRange> {
    let padded: Vec<TimeRange> = cuts
        .iter()
        .map(|c| TimeRange::new(c.start - padding.before(), c.end + padding.after()).clamp_to(total))
        .filter(|c| c.duration() >= padding.min_cut())
        .collect();
    merge_intervals(&padded, padding.merge_gap())
}

/// The parts of `window` not covered by any of `cuts`, in order.
pub fn subtract(window: TimeRange, cuts: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted: Vec<TimeRange> = cuts.to_vec();
    sorted.sort();

    let mut valid = Vec::new();
    let mut last = window.start;
    for cut in sorted {
        if cut.end <= window.start {
            continue;
        }
        if cut.start >= window.end {
            break;
        }
        if cut.start > last {
            valid.push(TimeRange::new(last, cut.start));
        }
        last = last.max(cut.end);
    }
    if last < window.end {
        valid.push(TimeRange::new(last, window.end));
    }
    valid
}

/// Overlap of two sets of ranges, merged.
pub fn intersect(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
    let a = merge_intervals(a, TimeUs::ZERO);
    let b = merge_intervals(b, TimeUs::ZERO);

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            out.push(TimeRange::new(start, end));
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Total length covered by a disjoint set.
pub fn total_length(ranges: &[TimeRange]) -> TimeUs {
    ranges.iter().map(|r| r.duration()).sum()
}
