use crate::types::{ScriptSegment, TimeUs, WordSpan};

/// Spread `duration` over the words of `text`, weighting each word by its
/// character count plus one for the following space. Spans are relative to
/// the start of the segment audio and the last one ends at `duration`.
pub fn estimate_word_spans(text: &str, duration: TimeUs) -> Vec<WordSpan> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || duration <= TimeUs::ZERO {
        return vec![];
    }

    let weights: Vec<i64> = words.iter().map(|w| w.chars().count() as i64 + 1).collect();
    let total_weight: i64 = weights.iter().sum();

    let mut spans = Vec::with_capacity(words.len());
    let mut consumed = 0i64;
    for (i, (word, weight)) in words.iter().zip(&weights).enumerate() {
        let start = TimeUs(duration.0 * consumed / total_weight);
        consumed += weight;
        let end = if i + 1 == words.len() {
            duration
        } else {
            TimeUs(duration.0 * consumed / total_weight)
        };
        spans.push(WordSpan {
            word: (*word).to_string(),
            start,
            end,
        });
    }
    spans
}

/// Recompute `wordSpans` for every kept segment with a measured duration.
pub fn attach_word_spans(segments: &[ScriptSegment]) -> Vec<ScriptSegment> {
    segments
        .iter()
        .map(|segment| {
            let mut segment = segment.clone();
            segment.word_spans = match (segment.is_kept(), segment.audio_duration) {
                (true, Some(duration)) => estimate_word_spans(&segment.voiceover_text, duration),
                _ => vec![],
            };
            segment
        })
        .collect()
}
