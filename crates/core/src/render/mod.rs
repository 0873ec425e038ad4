//! Subtitle rasterization.
//!
//! Wrapped lines are drawn into a transparent RGBA canvas of fixed size. The
//! outline is stamped first, the fill goes on top, and an optional plate sits
//! behind both. RTL blocks hug the right margin; LTR blocks are centred or
//! left aligned.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

use crate::layout::{self, ShapedLine};
use crate::shape::{Direction, ShapedText};

pub mod font;

pub use font::FontChain;

/// Horizontal extent of the background plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateSize {
    /// Just behind the text, plus padding.
    TextBounds,
    /// The whole canvas width.
    FullWidth,
}

/// Background behind the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateStyle {
    None,
    Solid(PlateSize),
    Translucent { alpha: u8, size: PlateSize },
}

/// Alignment of left-to-right blocks. RTL blocks are always right aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Center,
    Leading,
}

#[derive(Debug, Clone)]
pub struct RenderStyle {
    pub font_size: f32,
    pub fill: Rgba<u8>,
    pub outline: Rgba<u8>,
    /// Outline radius in pixels, 0 disables it.
    pub outline_width: u32,
    pub plate: PlateStyle,
    pub plate_color: Rgba<u8>,
    /// Line height as a multiple of the font size.
    pub line_spacing: f32,
    /// Space between text and plate edge.
    pub padding: u32,
    /// Space between text and canvas edge.
    pub margin: u32,
    pub ltr_alignment: Alignment,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            font_size: 40.0,
            fill: Rgba([255, 255, 255, 255]),
            outline: Rgba([0, 0, 0, 255]),
            outline_width: 2,
            plate: PlateStyle::None,
            plate_color: Rgba([0, 0, 0, 255]),
            line_spacing: 1.25,
            padding: 10,
            margin: 20,
            ltr_alignment: Alignment::Center,
        }
    }
}

impl RenderStyle {
    /// Line advance in pixels.
    pub fn line_height(&self) -> u32 {
        (self.font_size * self.line_spacing).ceil().max(1.0) as u32
    }
}

/// A rendered subtitle, ready to be composited.
#[derive(Debug, Clone, Serialize)]
pub struct SubtitleBlock {
    pub lines: Vec<ShapedLine>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    #[serde(skip)]
    pub bitmap: RgbaImage,
}

/// Draws wrapped lines with a resolved font chain.
#[derive(Clone)]
pub struct Rasterizer {
    fonts: Arc<FontChain>,
}

impl Rasterizer {
    /// Rasterizer drawing with `fonts`.
    pub fn new(fonts: Arc<FontChain>) -> Self {
        Self { fonts }
    }

    /// The resolved font chain.
    pub fn fonts(&self) -> &FontChain {
        &self.fonts
    }

    /// Widest line that fits inside a canvas of `canvas_width`.
    pub fn max_text_width(canvas_width: u32, style: &RenderStyle) -> f32 {
        canvas_width.saturating_sub(2 * style.margin).max(1) as f32
    }

    /// Canvas height for blocks of at most `max_lines` lines.
    pub fn canvas_height(max_lines: usize, style: &RenderStyle) -> u32 {
        (max_lines.max(1) as u32 * style.line_height() + 2 * style.padding).max(1)
    }

    /// Wrap shaped text for a canvas of `canvas_width`, measuring with this font chain.
    pub fn wrap(&self, text: &ShapedText, canvas_width: u32, style: &RenderStyle) -> Vec<ShapedLine> {
        let size = style.font_size;
        let fonts = self.fonts.as_ref();
        let measure = move |s: &str| fonts.measure(s, size);
        layout::wrap(
            text,
            &measure,
            Self::max_text_width(canvas_width, style),
            style.line_height(),
        )
    }

    /// Render `lines` into a `canvas_width` x `canvas_height` bitmap. Lines sit
    /// at the bottom of the canvas so blocks with fewer lines share a baseline
    /// with taller ones.
    pub fn rasterize(
        &self,
        lines: &[ShapedLine],
        canvas_width: u32,
        canvas_height: u32,
        style: &RenderStyle,
        direction: Direction,
    ) -> SubtitleBlock {
        let (width, height) = (canvas_width.max(1), canvas_height.max(1));
        trace!("rasterize {} line(s) into {}x{}", lines.len(), width, height);
        let mut bitmap = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));

        if !lines.is_empty() {
            let line_height = style.line_height();
            let block_height = layout::block_height(lines, line_height) as i32;
            let top = height as i32 - style.padding as i32 - block_height;
            let xs: Vec<f32> = lines
                .iter()
                .map(|line| line_x(line.width_px, width, style, direction))
                .collect();

            draw_plate(&mut bitmap, lines, &xs, top, block_height, style);

            let size = style.font_size;
            let ascent = self.fonts.ascent(size);
            let descent = self.fonts.descent(size);
            let slack = (line_height as f32 - (ascent - descent)) / 2.0;
            for (i, line) in lines.iter().enumerate() {
                let baseline = top as f32 + (i as u32 * line_height) as f32 + slack + ascent;
                let r = style.outline_width as i32;
                if r > 0 {
                    for dy in -r..=r {
                        for dx in -r..=r {
                            if (dx, dy) == (0, 0) || dx * dx + dy * dy > r * r {
                                continue;
                            }
                            let (x, y) = (xs[i] + dx as f32, baseline + dy as f32);
                            self.stamp(&mut bitmap, &line.visual_text, size, x, y, style.outline);
                        }
                    }
                }
                self.stamp(&mut bitmap, &line.visual_text, size, xs[i], baseline, style.fill);
            }
        }

        SubtitleBlock {
            lines: lines.to_vec(),
            canvas_width: width,
            canvas_height: height,
            bitmap,
        }
    }

    /// Draw `text` once in `color`, blending each covered pixel.
    fn stamp(&self, bitmap: &mut RgbaImage, text: &str, size: f32, x: f32, baseline: f32, color: Rgba<u8>) {
        let (w, h) = bitmap.dimensions();
        self.fonts.draw(text, size, x, baseline, &mut |px: i32, py: i32, coverage: f32| {
            if px < 0 || py < 0 || px as u32 >= w || py as u32 >= h {
                return;
            }
            let alpha = (color[3] as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
            if alpha == 0 {
                return;
            }
            let pixel = bitmap.get_pixel_mut(px as u32, py as u32);
            blend(pixel, Rgba([color[0], color[1], color[2], alpha]));
        });
    }
}

/// Left edge of a line for the block's direction and alignment.
fn line_x(line_width: f32, canvas_width: u32, style: &RenderStyle, direction: Direction) -> f32 {
    let canvas = canvas_width as f32;
    let margin = style.margin as f32;
    match (direction, style.ltr_alignment) {
        (Direction::Rtl, _) => canvas - margin - line_width,
        (Direction::Ltr, Alignment::Leading) => margin,
        (Direction::Ltr, Alignment::Center) => ((canvas - line_width) / 2.0).max(0.0),
    }
    .round()
}

/// Fill the background plate behind the lines, if the style has one.
fn draw_plate(bitmap: &mut RgbaImage, lines: &[ShapedLine], xs: &[f32], top: i32, block_height: i32, style: &RenderStyle) {
    let (size, alpha) = match style.plate {
        PlateStyle::None => return,
        PlateStyle::Solid(size) => (size, 255),
        PlateStyle::Translucent { alpha, size } => (size, alpha),
    };
    let pad = style.padding as i32;
    let (left, right) = match size {
        PlateSize::FullWidth => (0, bitmap.width() as i32),
        PlateSize::TextBounds => {
            let left = xs.iter().fold(f32::MAX, |a, &x| a.min(x)) as i32 - pad;
            let right = lines
                .iter()
                .zip(xs)
                .fold(f32::MIN, |a, (line, &x)| a.max(x + line.width_px)) as i32
                + pad;
            (left, right)
        }
    };
    let left = left.max(0);
    let right = right.min(bitmap.width() as i32);
    let y0 = (top - pad).max(0);
    let y1 = (top + block_height + pad).min(bitmap.height() as i32);
    if right <= left || y1 <= y0 {
        return;
    }
    let color = Rgba([style.plate_color[0], style.plate_color[1], style.plate_color[2], alpha]);
    let rect = Rect::at(left, y0).of_size((right - left) as u32, (y1 - y0) as u32);
    draw_filled_rect_mut(bitmap, rect, color);
}

/// Source-over blend of `src` onto `dst`, straight (non-premultiplied) alpha.
pub fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    if sa >= 1.0 {
        *dst = src;
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
