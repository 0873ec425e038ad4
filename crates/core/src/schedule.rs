//! Turns rendered segments into timed overlay instructions.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::TimingConfig;
use crate::render::SubtitleBlock;
use crate::translate::TranslatedSegment;

/// One subtitle bitmap with its on-screen interval and placement.
#[derive(Debug, Clone)]
pub struct OverlayInstruction {
    pub block: Arc<SubtitleBlock>,
    pub display_start: Duration,
    pub display_duration: Duration,
    /// Top-left corner of the canvas in frame coordinates.
    pub position: (i32, i32),
}

impl OverlayInstruction {
    /// First instant the overlay is no longer shown.
    pub fn display_end(&self) -> Duration {
        self.display_start + self.display_duration
    }

    /// Half-open: visible at `display_start`, gone at `display_end`.
    pub fn is_active(&self, t: Duration) -> bool {
        self.display_start <= t && t < self.display_end()
    }
}

/// Build overlay instructions, one per block, in the order given.
pub fn schedule(
    blocks: &[(TranslatedSegment, Arc<SubtitleBlock>)],
    frame: (u32, u32),
    timing: &TimingConfig,
) -> Vec<OverlayInstruction> {
    let overlays: Vec<OverlayInstruction> = blocks
        .iter()
        .map(|(segment, block)| {
            let start = &segment.segment.start;
            let end = &segment.segment.end;
            OverlayInstruction {
                display_start: shift(*start, timing.offset_ms),
                display_duration: end.saturating_sub(*start).max(timing.min_display),
                position: place(block, frame, timing.bottom_margin),
                block: Arc::clone(block),
            }
        })
        .collect();
    debug!(
        "scheduled {} overlay(s) with offset {}ms",
        overlays.len(),
        timing.offset_ms
    );
    overlays
}

/// `start + offset_ms`, floored at zero.
fn shift(start: Duration, offset_ms: i64) -> Duration {
    let nanos = start.as_nanos() as i128 + offset_ms as i128 * 1_000_000;
    Duration::from_nanos(nanos.clamp(0, u64::MAX as i128) as u64)
}

/// Centred horizontally, bottom edge `bottom_margin` above the frame bottom,
/// kept inside the frame.
fn place(block: &SubtitleBlock, (frame_w, frame_h): (u32, u32), bottom_margin: u32) -> (i32, i32) {
    let x = ((frame_w as i64 - block.canvas_width as i64) / 2).max(0);
    let lowest = (frame_h as i64 - block.canvas_height as i64).max(0);
    let y = (frame_h as i64 - bottom_margin as i64 - block.canvas_height as i64).clamp(0, lowest);
    (x as i32, y as i32)
}
