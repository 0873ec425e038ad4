//! Greedy line wrapping of shaped text.

use serde::Serialize;

use crate::shape::{Direction, ShapedText};

/// Pixel width of a run of text in some font.
pub trait TextMeasure {
    /// Width of `text` in pixels.
    fn measure(&self, text: &str) -> f32;
}

impl<F: Fn(&str) -> f32> TextMeasure for F {
    fn measure(&self, text: &str) -> f32 {
        self(text)
    }
}

/// One wrapped line in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapedLine {
    pub visual_text: String,
    pub width_px: f32,
    pub height_px: u32,
}

/// Wrap `text` to `max_width` pixels.
///
/// Tokens are whitespace-delimited and never split; a token wider than the
/// limit gets a line of its own. RTL text is already in visual order, which
/// puts the start of the sentence at the end of the string, so RTL lines are
/// filled from the end to keep the first sentence words on the top line.
///
/// Known limitation: an LTR run of several words inside an RTL sentence is a
/// single visual block, so filling from the end walks it backwards. When a
/// line break falls inside such a run (e.g. "Rust and Go" in a Hebrew
/// sentence), its words land on lines in the wrong reading order. Lines are
/// never reshaped, so this is not corrected here.
pub fn wrap(
    text: &ShapedText,
    measure: &dyn TextMeasure,
    max_width: f32,
    line_height: u32,
) -> Vec<ShapedLine> {
    let tokens: Vec<&str> = text.as_str().split_whitespace().collect();
    let rtl = text.direction() == Direction::Rtl;
    let ordered: Box<dyn Iterator<Item = &&str>> = if rtl {
        Box::new(tokens.iter().rev())
    } else {
        Box::new(tokens.iter())
    };

    let mut lines = Vec::new();
    let mut current = String::new();
    for token in ordered {
        if current.is_empty() {
            current.push_str(token);
            continue;
        }
        let candidate = if rtl {
            format!("{token} {current}")
        } else {
            format!("{current} {token}")
        };
        if measure.measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(finish(std::mem::take(&mut current), measure, line_height));
            current.push_str(token);
        }
    }
    if !current.is_empty() {
        lines.push(finish(current, measure, line_height));
    }
    lines
}

/// Close a line and measure it.
fn finish(text: String, measure: &dyn TextMeasure, line_height: u32) -> ShapedLine {
    ShapedLine {
        width_px: measure.measure(&text),
        visual_text: text,
        height_px: line_height,
    }
}

/// Height of a block of wrapped lines.
pub fn block_height(lines: &[ShapedLine], line_height: u32) -> u32 {
    lines.len() as u32 * line_height
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{BidiShaper, Shaper};

    /// Ten pixels per character.
    fn mono(text: &str) -> f32 {
        text.chars().count() as f32 * 10.0
    }

    fn texts(lines: &[ShapedLine]) -> Vec<&str> {
        lines.iter().map(|l| l.visual_text.as_str()).collect()
    }

    #[test]
    fn wraps_greedily() {
        let shaped = BidiShaper.shape("the quick brown fox jumps");
        let lines = wrap(&shaped, &mono, 110.0, 40);
        assert_eq!(texts(&lines), vec!["the quick", "brown fox", "jumps"]);
        assert!(lines.iter().all(|l| l.width_px <= 110.0));
        assert_eq!(block_height(&lines, 40), 120);
    }

    #[test]
    fn oversized_word_gets_its_own_line_unsplit() {
        let shaped = BidiShaper.shape("a supercalifragilistic b");
        let lines = wrap(&shaped, &mono, 50.0, 40);
        assert_eq!(texts(&lines), vec!["a", "supercalifragilistic", "b"]);
        assert_eq!(lines[1].width_px, 200.0);
    }

    #[test]
    fn fitting_words_are_never_split() {
        let shaped = BidiShaper.shape("one two three four five six");
        let lines = wrap(&shaped, &mono, 90.0, 40);
        let words: Vec<&str> = lines.iter().flat_map(|l| l.visual_text.split(' ')).collect();
        assert_eq!(words, vec!["one", "two", "three", "four", "five", "six"]);
    }

    #[test]
    fn rtl_first_line_holds_sentence_start() {
        // logical: "alef-word bet-word gimel-word"
        let shaped = BidiShaper.shape("אאא בבב גגג");
        let lines = wrap(&shaped, &mono, 70.0, 40);
        assert_eq!(texts(&lines), vec!["בבב אאא", "גגג"]);
    }

    #[test]
    fn ltr_run_split_inside_rtl_text_keeps_visual_token_order() {
        let shaped = BidiShaper.shape("אני אוהב Rust and Go מאוד");
        assert_eq!(shaped.as_str(), "דואמ Rust and Go בהוא ינא");
        let lines = wrap(&shaped, &mono, 130.0, 40);
        // "Go" lands on the first line, ahead of "Rust and"
        assert_eq!(texts(&lines), vec!["Go בהוא ינא", "דואמ Rust and"]);
    }

    #[test]
    fn empty_text_has_no_lines() {
        let shaped = BidiShaper.shape("   ");
        assert!(wrap(&shaped, &mono, 100.0, 40).is_empty());
    }
}
