//! Text shaping for right-to-left subtitles.
//!
//! The rasterizer only draws glyphs left to right, so RTL text has to be
//! turned into visual order before it is measured or drawn. [`ShapedText`]
//! can only be produced by a [`Shaper`], and everything downstream takes a
//! `&ShapedText`: a string is shaped once, before wrapping, and never again.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};
use unicode_bidi::BidiInfo;

mod arabic;

/// Base direction of a paragraph, taken from its first strong character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

/// Text in display order, ready for a left-to-right glyph renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapedText {
    visual: String,
    direction: Direction,
}

impl ShapedText {
    /// The text in display order.
    pub fn as_str(&self) -> &str {
        &self.visual
    }

    /// Paragraph direction of the logical text.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True for an empty subtitle.
    pub fn is_empty(&self) -> bool {
        self.visual.is_empty()
    }
}

/// Converts a logical string into display order.
pub trait Shaper: Send + Sync {
    /// Shape `logical` into display order.
    fn shape(&self, logical: &str) -> ShapedText;
}

/// Unicode bidi reordering plus Arabic contextual forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidiShaper;

impl Shaper for BidiShaper {
    fn shape(&self, logical: &str) -> ShapedText {
        trace!("shape len={}", logical.len());
        if logical.is_empty() {
            return ShapedText {
                visual: String::new(),
                direction: Direction::Ltr,
            };
        }
        let joined = if arabic::contains_arabic(logical) {
            arabic::reshape(logical)
        } else {
            logical.to_string()
        };
        // unicode-bidi has panicked on unbalanced isolate sequences; draw the
        // logical string rather than lose the subtitle.
        match panic::catch_unwind(AssertUnwindSafe(|| reorder(&joined))) {
            Ok(shaped) => shaped,
            Err(_) => {
                warn!("bidi reordering failed, rendering text unshaped");
                ShapedText {
                    visual: logical.to_string(),
                    direction: Direction::Ltr,
                }
            }
        }
    }
}

/// Reorder bidi runs into visual order.
fn reorder(text: &str) -> ShapedText {
    let info = BidiInfo::new(text, None);
    let direction = match info.paragraphs.first() {
        Some(para) if para.level.is_rtl() => Direction::Rtl,
        _ => Direction::Ltr,
    };
    if !info.has_rtl() {
        return ShapedText {
            visual: text.to_string(),
            direction,
        };
    }

    let mut visual = String::with_capacity(text.len());
    for para in &info.paragraphs {
        let range = para.range.clone();
        let body = text[range.clone()].trim_end_matches(['\n', '\r', '\u{2029}']);
        let line = range.start..range.start + body.len();
        if !line.is_empty() {
            let (levels, runs) = info.visual_runs(para, line.clone());
            for run in runs {
                let slice = &text[run.clone()];
                if levels[run.start].is_rtl() {
                    push_reversed(&mut visual, slice);
                } else {
                    visual.push_str(slice);
                }
            }
        }
        visual.push_str(&text[line.end..range.end]);
    }
    ShapedText { visual, direction }
}

/// Reverse an RTL run, keeping combining marks after their base letter and
/// mirroring paired punctuation.
fn push_reversed(out: &mut String, run: &str) {
    let mut clusters: Vec<String> = Vec::new();
    for c in run.chars() {
        match clusters.last_mut() {
            Some(cluster) if arabic::is_transparent(c) => cluster.push(c),
            _ => clusters.push(mirror(c).to_string()),
        }
    }
    for cluster in clusters.iter().rev() {
        out.push_str(cluster);
    }
}

/// Mirrored counterpart of paired punctuation.
fn mirror(c: char) -> char {
    match c {
        '(' => ')',
        ')' => '(',
        '[' => ']',
        ']' => '[',
        '{' => '}',
        '}' => '{',
        '<' => '>',
        '>' => '<',
        '«' => '»',
        '»' => '«',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_empty_output() {
        let shaped = BidiShaper.shape("");
        assert!(shaped.is_empty());
        assert_eq!(shaped.direction(), Direction::Ltr);
    }

    #[test]
    fn latin_text_is_unchanged() {
        let shaped = BidiShaper.shape("Hello world");
        assert_eq!(shaped.as_str(), "Hello world");
        assert_eq!(shaped.direction(), Direction::Ltr);
    }

    #[test]
    fn hebrew_is_reversed_into_visual_order() {
        let shaped = BidiShaper.shape("שלום עולם");
        assert_eq!(shaped.as_str(), "םלוע םולש");
        assert_eq!(shaped.direction(), Direction::Rtl);
    }

    #[test]
    fn mixed_text_keeps_run_order_and_inverts_blocks() {
        // Latin run stays readable, the blocks around it swap sides.
        let shaped = BidiShaper.shape("אני אוהב Rust מאוד");
        assert_eq!(shaped.as_str(), "דואמ Rust בהוא ינא");
    }

    #[test]
    fn brackets_are_mirrored_in_rtl_runs() {
        let shaped = BidiShaper.shape("שלום (עולם)");
        assert_eq!(shaped.as_str(), "(םלוע) םולש");
    }

    #[test]
    fn arabic_is_joined_then_reordered() {
        // "bab" (beh alef beh): joined forms, then reversed
        let shaped = BidiShaper.shape("\u{0628}\u{0627}\u{0628}");
        assert_eq!(shaped.as_str(), "\u{fe8f}\u{fe8e}\u{fe91}");
        assert_eq!(shaped.direction(), Direction::Rtl);
    }

    #[test]
    fn persian_is_joined_then_reordered() {
        let shaped = BidiShaper.shape("\u{067e}\u{067e}\u{067e}");
        assert_eq!(shaped.as_str(), "\u{fb57}\u{fb59}\u{fb58}");
        assert_eq!(shaped.direction(), Direction::Rtl);
        // beh before farsi yeh takes its initial form
        let shaped = BidiShaper.shape("\u{0628}\u{06cc}");
        assert_eq!(shaped.as_str(), "\u{fbfd}\u{fe91}");
    }

    #[test]
    fn shaping_twice_is_detectably_wrong() {
        let once = BidiShaper.shape("שלום עולם");
        let twice = BidiShaper.shape(once.as_str());
        assert_ne!(once, twice);
        assert_eq!(twice.as_str(), "שלום עולם");
    }

    #[test]
    fn niqqud_stays_on_its_letter() {
        // bet + dagesh, then shin
        let shaped = BidiShaper.shape("\u{05d1}\u{05bc}\u{05e9}");
        assert_eq!(shaped.as_str(), "\u{05e9}\u{05d1}\u{05bc}");
    }
}
