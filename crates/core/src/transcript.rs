//! Transcript ingestion: raw ASR output to an ordered segment list.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::srt::SrtCue;

/// Segment as returned by a transcription service, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl RawSegment {
    /// Segment with times in seconds.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// A transcribed span of speech. `end` is always after `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: Duration,
    pub end: Duration,
    pub source_text: String,
}

impl TranscriptSegment {
    /// How long the segment lasts.
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Normalize raw segments.
///
/// Text is trimmed and inner whitespace collapsed, segments without text are
/// dropped, negative or non-finite times become zero, the list is stably
/// sorted by start, and a segment whose end is not after its start is
/// stretched to `min_duration`.
pub fn normalize(raw: Vec<RawSegment>, min_duration: Duration) -> Vec<TranscriptSegment> {
    let total = raw.len();
    let mut segments: Vec<TranscriptSegment> = raw
        .into_iter()
        .filter_map(|seg| {
            let text = seg.text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                return None;
            }
            let start = seconds(seg.start);
            let mut end = seconds(seg.end);
            if end <= start {
                end = start + min_duration;
            }
            Some(TranscriptSegment {
                start,
                end,
                source_text: text,
            })
        })
        .collect();
    segments.sort_by_key(|s| s.start);
    if segments.len() != total {
        debug!("dropped {} empty segment(s)", total - segments.len());
    }
    segments
}

/// Build raw segments from parsed SRT cues.
pub fn from_srt(cues: &[SrtCue]) -> Vec<RawSegment> {
    cues.iter()
        .map(|cue| RawSegment {
            start: cue.start.as_secs_f64(),
            end: cue.end.as_secs_f64(),
            text: cue.lines.join(" "),
        })
        .collect()
}

/// Seconds to a duration; negative and non-finite become zero.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
