use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont, point};
use image::GrayImage;
use std::path::Path;

use crate::canvas::{TextAlign, TextContent};
use crate::io::EditorError;

// ============================================================================
// FONT BOOK
// ============================================================================

/// One registered face.
#[derive(Clone)]
pub struct FontFace {
    pub family: String,
    /// CSS-style weight, 100..900.
    pub weight: u16,
    pub italic: bool,
    pub font: FontArc,
}

/// Result of resolving a text style against the registered faces.  Missing
/// bold/italic faces are emulated at raster time.
pub struct ResolvedFont<'a> {
    pub font: &'a FontArc,
    pub synthetic_bold: bool,
    pub synthetic_italic: bool,
}

/// Fonts available to the compositor.  The host registers font bytes; the
/// first registered face is the fallback for unknown families.
#[derive(Clone, Default)]
pub struct FontBook {
    faces: Vec<FontFace>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn families(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.faces.iter().map(|f| f.family.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn register(
        &mut self,
        family: impl Into<String>,
        weight: u16,
        italic: bool,
        bytes: Vec<u8>,
    ) -> Result<(), EditorError> {
        let family = family.into();
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| EditorError::InvalidFormat(format!("font '{}': {}", family, e)))?;
        crate::log_info!("Registered font '{}' weight {} italic {}", family, weight, italic);
        self.faces.push(FontFace { family, weight, italic, font });
        Ok(())
    }

    /// Register a TTF/OTF file under its file stem as family name.
    pub fn register_file(&mut self, path: &Path) -> Result<(), EditorError> {
        let bytes = std::fs::read(path)?;
        let family = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "font".to_string());
        self.register(family, 400, false, bytes)
    }

    /// Closest face for the requested style: exact family if registered
    /// (else the fallback face), then matching slant, then nearest weight.
    pub fn resolve(&self, family: &str, weight: u16, italic: bool) -> Option<ResolvedFont<'_>> {
        let same_family: Vec<&FontFace> = self
            .faces
            .iter()
            .filter(|f| f.family.eq_ignore_ascii_case(family))
            .collect();
        let face = if same_family.is_empty() {
            self.faces.first()?
        } else {
            same_family
                .into_iter()
                .min_by_key(|f| ((f.italic != italic) as u32, (f.weight as i32 - weight as i32).unsigned_abs()))?
        };
        Some(ResolvedFont {
            font: &face.font,
            synthetic_bold: weight >= 600 && face.weight < 600,
            synthetic_italic: italic && !face.italic,
        })
    }
}

// ============================================================================
// LAYOUT
// ============================================================================

/// Pixel scale at which one em equals `font_size`.
pub fn px_scale(font: &FontArc, font_size: f32) -> PxScale {
    match font.units_per_em() {
        Some(upem) if upem > 0.0 => PxScale::from(font_size * font.height_unscaled() / upem),
        _ => PxScale::from(font_size),
    }
}

/// Advance width of a single line, kerning included.
pub fn measure_line(font: &FontArc, text: &str, font_size: f32) -> f32 {
    let scaled = font.as_scaled(px_scale(font, font_size));
    let mut width = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        last = Some(id);
    }
    width
}

/// Width estimate used when no font is registered.
pub fn fallback_measure(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * 0.5
}

/// Greedy word wrap: words are appended to the running line while its
/// measured width fits `max_width`.  Explicit newlines always break; a word
/// wider than the box gets a line of its own.
pub fn wrap_lines<F>(text: &str, max_width: f32, mut measure: F) -> Vec<String>
where
    F: FnMut(&str) -> f32,
{
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split(' ').filter(|w| !w.is_empty()) {
            let candidate = if line.is_empty() { word.to_string() } else { format!("{} {}", line, word) };
            if !line.is_empty() && measure(&candidate) > max_width {
                lines.push(std::mem::replace(&mut line, word.to_string()));
            } else {
                line = candidate;
            }
        }
        lines.push(line);
    }
    lines
}

/// Lines of a text layer after the uppercase transform and wrapping.
pub fn layout_text_layer<F>(content: &TextContent, width: f32, measure: F) -> Vec<String>
where
    F: FnMut(&str) -> f32,
{
    wrap_lines(&content.display_text(), width, measure)
}

/// Left edge of a line of `line_width` anchored at `anchor_x`.
pub fn aligned_start(align: TextAlign, anchor_x: f32, line_width: f32) -> f32 {
    match align {
        TextAlign::Left => anchor_x,
        TextAlign::Center => anchor_x - line_width * 0.5,
        TextAlign::Right => anchor_x - line_width,
    }
}

// ============================================================================
// RASTER
// ============================================================================

/// Glyph coverage of one line, rendered at `device_scale` device pixels per
/// local unit.  Pixel (0, 0) sits at local `(-pad, -pad)` relative to the
/// line box's top-left; the baseline is placed with half-leading inside a
/// box `line_box` local units tall.
pub struct LineRaster {
    pub coverage: GrayImage,
    /// Padding in device pixels around the line box.
    pub pad: u32,
}

pub fn rasterize_line(
    font: &ResolvedFont<'_>,
    text: &str,
    font_size: f32,
    line_box: f32,
    device_scale: f32,
) -> Option<LineRaster> {
    let size = font_size * device_scale;
    if size <= 0.0 || text.is_empty() {
        return None;
    }
    let scale = px_scale(font.font, size);
    let scaled = font.font.as_scaled(scale);
    let ascent = scaled.ascent();
    let content_h = ascent - scaled.descent();
    let baseline = (line_box * device_scale - content_h) * 0.5 + ascent;

    let width = measure_line(font.font, text, font_size) * device_scale;
    let shear = if font.synthetic_italic { 0.2 } else { 0.0 };
    let dilate = if font.synthetic_bold { (size * 0.04).round().max(1.0) as i32 } else { 0 };
    let pad = (ascent * shear).ceil() as u32 + dilate as u32 + 2;

    let buf_w = width.ceil() as u32 + pad * 2;
    let buf_h = (line_box * device_scale).max(content_h).ceil() as u32 + pad * 2;
    let mut coverage = GrayImage::new(buf_w, buf_h);

    let mut cursor = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = font.font.glyph_id(ch);
        if let Some(prev) = last {
            cursor += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, point(cursor, baseline));
        cursor += scaled.h_advance(id);
        last = Some(id);

        let Some(outlined) = font.font.outline_glyph(glyph) else { continue };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, cov| {
            let y = bounds.min.y + gy as f32;
            let mut x = bounds.min.x + gx as f32;
            x += (baseline - y) * shear;
            let iy = y as i32 + pad as i32;
            for d in 0..=dilate {
                let ix = x.round() as i32 + pad as i32 + d;
                if ix >= 0 && iy >= 0 && (ix as u32) < buf_w && (iy as u32) < buf_h {
                    let px = coverage.get_pixel_mut(ix as u32, iy as u32);
                    let v = (cov.clamp(0.0, 1.0) * 255.0).round() as u8;
                    px[0] = px[0].max(v);
                }
            }
        });
    }

    Some(LineRaster { coverage, pad })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_chars(s: &str) -> f32 {
        s.chars().count() as f32 * 10.0
    }

    #[test]
    fn wraps_greedily() {
        let lines = wrap_lines("aa bb cc dd", 50.0, by_chars);
        assert_eq!(lines, vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn long_word_gets_own_line() {
        let lines = wrap_lines("a verylongword b", 40.0, by_chars);
        assert_eq!(lines, vec!["a", "verylongword", "b"]);
    }

    #[test]
    fn newlines_always_break() {
        let lines = wrap_lines("one\n\ntwo", 500.0, by_chars);
        assert_eq!(lines, vec!["one", "", "two"]);
    }

    #[test]
    fn uppercase_applies_before_wrapping() {
        let content = TextContent { text: "ab cd".into(), uppercase: true, ..TextContent::default() };
        assert_eq!(layout_text_layer(&content, 1000.0, by_chars), vec!["AB CD"]);
    }

    #[test]
    fn alignment_anchors() {
        assert_eq!(aligned_start(TextAlign::Left, 100.0, 40.0), 100.0);
        assert_eq!(aligned_start(TextAlign::Center, 100.0, 40.0), 80.0);
        assert_eq!(aligned_start(TextAlign::Right, 100.0, 40.0), 60.0);
    }

    #[test]
    fn empty_book_resolves_nothing() {
        assert!(FontBook::new().resolve("Inter", 400, false).is_none());
        assert!(FontBook::new().register("bad", 400, false, vec![1, 2, 3]).is_err());
    }
}
