//! Frame compositing.
//!
//! [`OverlayIndex`] answers "which overlays are visible at time t" without
//! scanning every instruction: instructions are ordered by start time and a
//! segment tree keeps the latest end time of every range, so subtrees that
//! ended before `t` are skipped whole.

use image::RgbaImage;
use std::time::Duration;

use crate::render::blend;
use crate::schedule::OverlayInstruction;

/// Interval index over overlay instructions.
#[derive(Debug, Clone)]
pub struct OverlayIndex {
    instructions: Vec<OverlayInstruction>,
    /// Instruction indices sorted by display start (stable).
    by_start: Vec<usize>,
    starts: Vec<Duration>,
    /// Segment tree of maximum display end over `by_start` positions.
    max_end: Vec<Duration>,
}

impl OverlayIndex {
    /// Index `instructions`, keeping their insertion order for drawing.
    pub fn build(instructions: Vec<OverlayInstruction>) -> Self {
        let mut by_start: Vec<usize> = (0..instructions.len()).collect();
        by_start.sort_by_key(|&i| instructions[i].display_start);
        let starts = by_start.iter().map(|&i| instructions[i].display_start).collect();
        let ends: Vec<Duration> = by_start.iter().map(|&i| instructions[i].display_end()).collect();
        let mut max_end = vec![Duration::ZERO; 4 * ends.len().max(1)];
        if !ends.is_empty() {
            fill(&mut max_end, &ends, 1, 0, ends.len());
        }
        Self {
            instructions,
            by_start,
            starts,
            max_end,
        }
    }

    /// Number of indexed overlays.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Overlay by insertion index.
    pub fn get(&self, index: usize) -> Option<&OverlayInstruction> {
        self.instructions.get(index)
    }

    /// All overlays in insertion order.
    pub fn instructions(&self) -> &[OverlayInstruction] {
        &self.instructions
    }

    /// Indices of instructions visible at `t`, in insertion order.
    pub fn active_at(&self, t: Duration) -> Vec<usize> {
        let mut out = Vec::new();
        // only instructions that started at or before t can be active
        let started = self.starts.partition_point(|&s| s <= t);
        if started > 0 {
            self.collect(1, 0, self.starts.len(), started, t, &mut out);
        }
        out.sort_unstable();
        out
    }

    /// Walk the tree, pushing every overlay among the first `limit` that is still visible at `t`.
    fn collect(&self, node: usize, lo: usize, hi: usize, limit: usize, t: Duration, out: &mut Vec<usize>) {
        if lo >= limit || self.max_end[node] <= t {
            return;
        }
        if hi - lo == 1 {
            out.push(self.by_start[lo]);
            return;
        }
        let mid = (lo + hi) / 2;
        self.collect(2 * node, lo, mid, limit, t, out);
        self.collect(2 * node + 1, mid, hi, limit, t, out);
    }
}

/// Build the max-end tree for `ends[lo..hi]` rooted at `node`.
fn fill(tree: &mut [Duration], ends: &[Duration], node: usize, lo: usize, hi: usize) -> Duration {
    let value = if hi - lo == 1 {
        ends[lo]
    } else {
        let mid = (lo + hi) / 2;
        let left = fill(tree, ends, 2 * node, lo, mid);
        let right = fill(tree, ends, 2 * node + 1, mid, hi);
        left.max(right)
    };
    tree[node] = value;
    value
}

/// Blends active overlays into decoded frames.
#[derive(Debug, Clone)]
pub struct Compositor {
    index: OverlayIndex,
}

impl Compositor {
    /// Compositor drawing the overlays in `index`.
    pub fn new(index: OverlayIndex) -> Self {
        Self { index }
    }

    /// The overlay index.
    pub fn index(&self) -> &OverlayIndex {
        &self.index
    }

    /// Draw every overlay visible at `t` onto `frame`, oldest first, clipped
    /// to the frame. Returns how many overlays were drawn.
    pub fn composite_frame(&self, frame: &mut RgbaImage, t: Duration) -> usize {
        let active = self.index.active_at(t);
        for &i in &active {
            if let Some(overlay) = self.index.get(i) {
                draw(frame, overlay);
            }
        }
        active.len()
    }
}

/// Blend one overlay onto the frame, clipped to the frame.
fn draw(frame: &mut RgbaImage, overlay: &OverlayInstruction) {
    let (fw, fh) = (frame.width() as i64, frame.height() as i64);
    let (ox, oy) = (overlay.position.0 as i64, overlay.position.1 as i64);
    let bitmap = &overlay.block.bitmap;
    for (bx, by, pixel) in bitmap.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        let (x, y) = (ox + bx as i64, oy + by as i64);
        if x < 0 || y < 0 || x >= fw || y >= fh {
            continue;
        }
        blend(frame.get_pixel_mut(x as u32, y as u32), *pixel);
    }
}
