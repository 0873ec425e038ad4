//! Font resolution with a built-in last resort.
//!
//! A [`FontChain`] is an ordered list of glyph sources. Each character is drawn
//! with the first source that has a glyph for it; the chain always ends with
//! [`BuiltinFont`], which draws a box for anything, so drawing never fails.

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Well known locations of fonts with Hebrew and Latin coverage.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/noto/NotoSansHebrew-Regular.ttf",
    "/usr/share/fonts/opentype/noto/NotoSansHebrew-Regular.ttf",
    "/usr/share/fonts/noto/NotoSansHebrew-Regular.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/msttcorefonts/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Something that can measure and draw single characters.
pub trait GlyphSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;
    /// Whether this source can draw `c`.
    fn has_glyph(&self, c: char) -> bool;
    /// Horizontal advance of `c` at `size` pixels.
    fn advance(&self, c: char, size: f32) -> f32;
    /// Distance from baseline to the top of the tallest glyphs.
    fn ascent(&self, size: f32) -> f32;
    /// Distance from baseline to the bottom of descenders, negative.
    fn descent(&self, size: f32) -> f32;
    /// Draw `c` with its origin at `(x, baseline)`. `plot` receives absolute
    /// pixel coordinates and a coverage in `0.0..=1.0`.
    fn draw_glyph(&self, c: char, size: f32, x: f32, baseline: f32, plot: &mut dyn FnMut(i32, i32, f32));
}

/// A TrueType/OpenType font file.
pub struct TrueTypeFont {
    name: String,
    font: FontVec,
}

impl TrueTypeFont {
    /// Load a TrueType or OpenType file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow::anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self {
            name: path.display().to_string(),
            font,
        })
    }
}

impl GlyphSource for TrueTypeFont {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_glyph(&self, c: char) -> bool {
        c.is_whitespace() || self.font.glyph_id(c).0 != 0
    }

    fn advance(&self, c: char, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        scaled.h_advance(scaled.glyph_id(c))
    }

    fn ascent(&self, size: f32) -> f32 {
        self.font.as_scaled(PxScale::from(size)).ascent()
    }

    fn descent(&self, size: f32) -> f32 {
        self.font.as_scaled(PxScale::from(size)).descent()
    }

    fn draw_glyph(&self, c: char, size: f32, x: f32, baseline: f32, plot: &mut dyn FnMut(i32, i32, f32)) {
        let glyph = self
            .font
            .glyph_id(c)
            .with_scale_and_position(PxScale::from(size), point(x, baseline));
        if let Some(outlined) = self.font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            let (left, top) = (bounds.min.x as i32, bounds.min.y as i32);
            outlined.draw(|gx, gy, coverage| plot(left + gx as i32, top + gy as i32, coverage));
        }
    }
}

/// Draws every printable character as a hollow box. Needs no font file.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFont;

impl GlyphSource for BuiltinFont {
    fn name(&self) -> &str {
        "builtin"
    }

    fn has_glyph(&self, _c: char) -> bool {
        true
    }

    fn advance(&self, c: char, size: f32) -> f32 {
        if c.is_whitespace() {
            size * 0.3
        } else {
            size * 0.6
        }
    }

    fn ascent(&self, size: f32) -> f32 {
        size * 0.8
    }

    fn descent(&self, size: f32) -> f32 {
        -size * 0.2
    }

    fn draw_glyph(&self, c: char, size: f32, x: f32, baseline: f32, plot: &mut dyn FnMut(i32, i32, f32)) {
        if c.is_whitespace() || c.is_control() {
            return;
        }
        let left = (x + size * 0.1).round() as i32;
        let right = (x + size * 0.5).round() as i32;
        let top = (baseline - size * 0.7).round() as i32;
        let bottom = baseline.round() as i32;
        let stroke = ((size / 12.0).round() as i32).max(1);
        for py in top..bottom {
            for px in left..right {
                let edge = px < left + stroke || px >= right - stroke || py < top + stroke || py >= bottom - stroke;
                if edge {
                    plot(px, py, 1.0);
                }
            }
        }
    }
}

/// Ordered glyph sources, ending with [`BuiltinFont`].
pub struct FontChain {
    sources: Vec<Arc<dyn GlyphSource>>,
}

impl FontChain {
    /// Configured paths first, then the known system fonts.
    pub fn resolve(configured: &[PathBuf]) -> Self {
        let candidates: Vec<PathBuf> = configured
            .iter()
            .cloned()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from))
            .collect();
        Self::from_files(&candidates)
    }

    /// Only the given files, plus the built-in fallback.
    pub fn from_files(paths: &[PathBuf]) -> Self {
        let mut sources: Vec<Arc<dyn GlyphSource>> = Vec::new();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            match TrueTypeFont::load(path) {
                Ok(font) => {
                    debug!("loaded font {}", path.display());
                    sources.push(Arc::new(font));
                }
                Err(e) => warn!("skipping font {}: {}", path.display(), e),
            }
        }
        if sources.is_empty() {
            warn!("no usable font file found, subtitles will use box glyphs");
        } else {
            info!("primary subtitle font: {}", sources[0].name());
        }
        sources.push(Arc::new(BuiltinFont));
        Self { sources }
    }

    /// Chain with only the builtin font.
    pub fn builtin() -> Self {
        Self {
            sources: vec![Arc::new(BuiltinFont)],
        }
    }

    /// Name of the first source, used for line metrics.
    pub fn primary_name(&self) -> &str {
        self.primary().name()
    }

    /// The first source in the chain.
    fn primary(&self) -> &dyn GlyphSource {
        // never empty: every constructor pushes the builtin font
        self.sources[0].as_ref()
    }

    /// First source that has a glyph for `c`.
    fn source_for(&self, c: char) -> &dyn GlyphSource {
        self.sources
            .iter()
            .find(|s| s.has_glyph(c))
            .map(|s| s.as_ref())
            .unwrap_or_else(|| self.primary())
    }

    /// Width of `text` at `size` pixels.
    pub fn measure(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.source_for(c).advance(c, size)).sum()
    }

    /// Ascent of the primary font.
    pub fn ascent(&self, size: f32) -> f32 {
        self.primary().ascent(size)
    }

    /// Descent of the primary font, negative below the baseline.
    pub fn descent(&self, size: f32) -> f32 {
        self.primary().descent(size)
    }

    /// Draw a run left to right starting at `(x, baseline)`.
    pub fn draw(&self, text: &str, size: f32, x: f32, baseline: f32, plot: &mut dyn FnMut(i32, i32, f32)) {
        let mut pen = x;
        for c in text.chars() {
            let source = self.source_for(c);
            source.draw_glyph(c, size, pen, baseline, plot);
            pen += source.advance(c, size);
        }
    }
}
