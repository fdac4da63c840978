//! Text stickers: greedy word wrap with shrink-to-fit, drawn black on white and encoded as WEBP.

use crate::config::MediaConfig;
use crate::media::MediaError;
use ab_glyph::{Font, PxScale, ScaleFont};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// Square canvas edge in pixels.
pub const CANVAS_SIZE: u32 = 512;
/// Square content box edge; the remainder is an even margin.
pub const CONTENT_SIZE: u32 = 480;

/// Width and line height of text at a given font size.
pub trait TextMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32;
    fn line_height(&self, font_size: f32) -> f32;
}

/// Glyph metrics of a real font (advances plus kerning).
pub struct FontMeasure<'a, F: Font> {
    font: &'a F,
}

impl<'a, F: Font> FontMeasure<'a, F> {
    pub fn new(font: &'a F) -> Self {
        Self { font }
    }
}

impl<F: Font> TextMeasure for FontMeasure<'_, F> {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(font_size));
        let mut width = 0.0;
        let mut prev = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(p) = prev {
                width += scaled.kern(p, id);
            }
            width += scaled.h_advance(id);
            prev = Some(id);
        }
        width
    }

    fn line_height(&self, font_size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(font_size));
        scaled.height() + scaled.line_gap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayoutParams {
    pub start_size: f32,
    pub min_size: f32,
    pub step: f32,
    pub content_width: f32,
    pub content_height: f32,
}

impl TextLayoutParams {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            start_size: config.font_size,
            min_size: config.min_font_size.min(config.font_size),
            step: config.font_step,
            content_width: CONTENT_SIZE as f32,
            content_height: CONTENT_SIZE as f32,
        }
    }
}

/// Wrapped lines at the chosen font size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub font_size: f32,
    pub line_height: f32,
    pub lines: Vec<String>,
}

impl TextLayout {
    pub fn total_height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }
}

/// Greedily pack words into lines no wider than `max_width`. A single word wider than
/// `max_width` gets a line of its own.
fn wrap(words: &[&str], measure: &dyn TextMeasure, font_size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in words {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if measure.width(&candidate, font_size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, (*word).to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Wrap `text`, shrinking the font by `step` until the block fits the content box or the
/// minimum size is reached. At the minimum size overflow is accepted.
pub fn layout_text(text: &str, measure: &dyn TextMeasure, params: &TextLayoutParams) -> TextLayout {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut font_size = params.start_size;
    loop {
        let lines = wrap(&words, measure, font_size, params.content_width);
        let line_height = measure.line_height(font_size);
        let fits = lines.len() as f32 * line_height <= params.content_height
            && lines
                .iter()
                .all(|l| measure.width(l, font_size) <= params.content_width);
        if fits || font_size <= params.min_size {
            return TextLayout {
                font_size,
                line_height,
                lines,
            };
        }
        font_size = if params.step > 0.0 {
            (font_size - params.step).max(params.min_size)
        } else {
            params.min_size
        };
    }
}

/// Render `text` centered on a white square canvas and encode it as WEBP.
pub(crate) fn render<F: Font>(text: &str, font: &F, params: &TextLayoutParams) -> Result<Vec<u8>, MediaError> {
    let measure = FontMeasure::new(font);
    let layout = layout_text(text, &measure, params);
    log::debug!(
        "media: text sticker with {} line(s) at {}px",
        layout.lines.len(),
        layout.font_size
    );

    let mut canvas = RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba([255, 255, 255, 255]));
    let margin = (CANVAS_SIZE - CONTENT_SIZE) as f32 / 2.0;
    let top = margin + ((params.content_height - layout.total_height()) / 2.0).max(0.0);
    let scale = PxScale::from(layout.font_size);
    for (i, line) in layout.lines.iter().enumerate() {
        let width = measure.width(line, layout.font_size);
        let x = margin + ((params.content_width - width) / 2.0).max(0.0);
        let y = top + i as f32 * layout.line_height;
        imageproc::drawing::draw_text_mut(
            &mut canvas,
            Rgba([0, 0, 0, 255]),
            x.round() as i32,
            y.round() as i32,
            scale,
            font,
            line,
        );
    }

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageFormat::WebP)
        .map_err(|e| MediaError::Render(format!("encoding webp: {}", e)))?;
    Ok(out.into_inner())
}
