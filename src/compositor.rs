//! Deterministic rasterization of layer stacks into flat bitmaps.
//!
//! The layer walk (`render_into`) only talks to the [`Surface`] trait, a
//! small immediate-mode drawing API.  [`SoftwareSurface`] implements it on
//! an `RgbaImage` with anti-aliased SDF coverage and the blend math from
//! `canvas::blend_pixel`.

use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::canvas::{
    BlendMode, CanvasState, Color, Layer, LayerContent, ShapeKind, TextAlign, TextContent, blend_pixel,
};
use crate::geometry::{Affine, Point, Rect, rotated_bounding_box};
use crate::ops::shapes::{coverage, sdf_box, sdf_ellipse, sdf_rounded_box};
use crate::ops::text::{FontBook, aligned_start, fallback_measure, layout_text_layer, measure_line, rasterize_line};

// ============================================================================
// BITMAP STORE
// ============================================================================

/// Decoded source bitmaps referenced by image layers.  Entries are never
/// mutated, only added, so history snapshots can keep referring to them.
#[derive(Clone, Default)]
pub struct BitmapStore {
    images: HashMap<String, Arc<RgbaImage>>,
}

impl BitmapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store under a fresh key and return it.
    pub fn insert(&mut self, image: RgbaImage) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        self.images.insert(key.clone(), Arc::new(image));
        key
    }

    pub fn insert_with_key(&mut self, key: impl Into<String>, image: Arc<RgbaImage>) {
        self.images.insert(key.into(), image);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<RgbaImage>> {
        self.images.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.images.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<RgbaImage>)> {
        self.images.iter()
    }
}

/// Everything the layer walk needs besides the layers themselves.
#[derive(Clone, Copy)]
pub struct RenderResources<'a> {
    pub bitmaps: &'a BitmapStore,
    pub fonts: &'a FontBook,
}

// ============================================================================
// SURFACE
// ============================================================================

/// Font selection for text calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStyle<'a> {
    pub family: &'a str,
    pub size: f32,
    pub weight: u16,
    pub italic: bool,
}

impl<'a> From<&'a TextContent> for TextStyle<'a> {
    fn from(t: &'a TextContent) -> Self {
        TextStyle { family: &t.font_family, size: t.font_size, weight: t.font_weight, italic: t.italic }
    }
}

/// Minimal 2D drawing backend.  Coordinates are in the current user space
/// (after `translate` / `rotate` / `scale`).
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f32, dy: f32);
    fn rotate(&mut self, radians: f32);
    fn scale(&mut self, sx: f32, sy: f32);
    fn set_global_alpha(&mut self, alpha: f32);
    fn set_blend_mode(&mut self, mode: BlendMode);
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn fill_rounded_rect(&mut self, rect: Rect, radius: f32, color: Color);
    fn fill_ellipse(&mut self, bounds: Rect, color: Color);
    fn draw_image(&mut self, image: &RgbaImage, dest: Rect);
    fn measure_text(&self, style: &TextStyle<'_>, text: &str) -> f32;
    /// Draw one line whose box top is `top`, anchored at `anchor_x` per
    /// `align`, vertically centered in a box `line_box` tall.
    #[allow(clippy::too_many_arguments)]
    fn fill_text(
        &mut self,
        style: &TextStyle<'_>,
        text: &str,
        anchor_x: f32,
        top: f32,
        line_box: f32,
        align: TextAlign,
        color: Color,
    );
}

#[derive(Clone, Copy, Debug)]
struct DrawState {
    transform: Affine,
    alpha: f32,
    blend: BlendMode,
}

impl Default for DrawState {
    fn default() -> Self {
        Self { transform: Affine::IDENTITY, alpha: 1.0, blend: BlendMode::Normal }
    }
}

/// CPU reference backend.
pub struct SoftwareSurface<'f> {
    pixels: RgbaImage,
    state: DrawState,
    stack: Vec<DrawState>,
    fonts: &'f FontBook,
}

impl<'f> SoftwareSurface<'f> {
    pub fn new(width: u32, height: u32, fonts: &'f FontBook) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            state: DrawState::default(),
            stack: Vec::new(),
            fonts,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    /// Composite a primitive covering `local` (user space).  `sample` maps a
    /// user-space point to `(coverage, straight RGBA)`.  Only device pixels
    /// inside the transformed bounds are visited.
    fn fill_coverage<F>(&mut self, local: Rect, sample: F)
    where
        F: Fn(Point) -> Option<(f32, [u8; 4])> + Sync,
    {
        if local.is_empty() || self.state.alpha <= 0.0 {
            return;
        }
        let Some(inv) = self.state.transform.inverse() else { return };

        let corners = local.corners().map(|p| self.state.transform.apply(p));
        let (w, h) = self.pixels.dimensions();
        let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil().min(w as f32);
        let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil().min(h as f32);
        if min_x >= max_x || min_y >= max_y {
            return;
        }
        let (x0, x1) = (min_x as usize, max_x as usize);
        let (y0, y1) = (min_y as usize, max_y as usize);

        let alpha = self.state.alpha;
        let blend = self.state.blend;
        let stride = w as usize * 4;

        self.pixels
            .par_chunks_mut(stride)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .for_each(|(y, row)| {
                for x in x0..x1 {
                    let p = inv.apply(Point::new(x as f32 + 0.5, y as f32 + 0.5));
                    let Some((cov, color)) = sample(p) else { continue };
                    if cov <= 0.0 || color[3] == 0 {
                        continue;
                    }
                    let top = Rgba([
                        color[0],
                        color[1],
                        color[2],
                        (color[3] as f32 * cov.min(1.0)).round() as u8,
                    ]);
                    let i = x * 4;
                    let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                    let out = blend_pixel(base, top, blend, alpha);
                    row[i..i + 4].copy_from_slice(&out.0);
                }
            });
    }
}

/// Premultiplied bilinear sample at continuous pixel coordinates (pixel
/// centers at `i + 0.5`), clamped to the edge.
fn sample_bilinear(img: &RgbaImage, u: f32, v: f32) -> [u8; 4] {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return [0; 4];
    }
    let fx = u - 0.5;
    let fy = v - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let cx = |x: f32| (x as i64).clamp(0, w as i64 - 1) as u32;
    let cy = |y: f32| (y as i64).clamp(0, h as i64 - 1) as u32;

    let taps = [
        (cx(x0), cy(y0), (1.0 - tx) * (1.0 - ty)),
        (cx(x0 + 1.0), cy(y0), tx * (1.0 - ty)),
        (cx(x0), cy(y0 + 1.0), (1.0 - tx) * ty),
        (cx(x0 + 1.0), cy(y0 + 1.0), tx * ty),
    ];
    let mut acc = [0.0f32; 4];
    for (x, y, wgt) in taps {
        if wgt == 0.0 {
            continue;
        }
        let p = img.get_pixel(x, y);
        let a = p[3] as f32 / 255.0;
        acc[0] += p[0] as f32 * a * wgt;
        acc[1] += p[1] as f32 * a * wgt;
        acc[2] += p[2] as f32 * a * wgt;
        acc[3] += p[3] as f32 * wgt;
    }
    if acc[3] <= 0.0 {
        return [0; 4];
    }
    let un = 255.0 / acc[3];
    [
        (acc[0] * un).round().clamp(0.0, 255.0) as u8,
        (acc[1] * un).round().clamp(0.0, 255.0) as u8,
        (acc[2] * un).round().clamp(0.0, 255.0) as u8,
        acc[3].round().clamp(0.0, 255.0) as u8,
    ]
}

fn sample_gray_bilinear(img: &GrayImage, u: f32, v: f32) -> f32 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let fx = u - 0.5;
    let fy = v - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let get = |x: f32, y: f32| {
        if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
            0.0
        } else {
            img.get_pixel(x as u32, y as u32)[0] as f32
        }
    };
    let top = get(x0, y0) * (1.0 - tx) + get(x0 + 1.0, y0) * tx;
    let bottom = get(x0, y0 + 1.0) * (1.0 - tx) + get(x0 + 1.0, y0 + 1.0) * tx;
    (top * (1.0 - ty) + bottom * ty) / 255.0
}

impl Surface for SoftwareSurface<'_> {
    fn width(&self) -> u32 {
        self.pixels.width()
    }

    fn height(&self) -> u32 {
        self.pixels.height()
    }

    fn save(&mut self) {
        self.stack.push(self.state);
    }

    fn restore(&mut self) {
        if let Some(s) = self.stack.pop() {
            self.state = s;
        }
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.state.transform = self.state.transform.then_apply(&Affine::translation(dx, dy));
    }

    fn rotate(&mut self, radians: f32) {
        self.state.transform = self.state.transform.then_apply(&Affine::rotation(radians));
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.state.transform = self.state.transform.then_apply(&Affine::scaling(sx, sy));
    }

    fn set_global_alpha(&mut self, alpha: f32) {
        self.state.alpha = alpha.clamp(0.0, 1.0);
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend = mode;
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.fill_rounded_rect(rect, 0.0, color);
    }

    fn fill_rounded_rect(&mut self, rect: Rect, radius: f32, color: Color) {
        let ds = self.state.transform.scale_factor();
        let c = rect.center();
        let (hx, hy) = (rect.width * 0.5, rect.height * 0.5);
        let rgba = color.0;
        self.fill_coverage(rect, move |p| {
            let d = if radius > 0.0 {
                sdf_rounded_box(p.x - c.x, p.y - c.y, hx, hy, radius)
            } else {
                sdf_box(p.x - c.x, p.y - c.y, hx, hy)
            };
            Some((coverage(d * ds), rgba))
        });
    }

    fn fill_ellipse(&mut self, bounds: Rect, color: Color) {
        let ds = self.state.transform.scale_factor();
        let c = bounds.center();
        let (rx, ry) = (bounds.width * 0.5, bounds.height * 0.5);
        let rgba = color.0;
        self.fill_coverage(bounds, move |p| {
            Some((coverage(sdf_ellipse(p.x - c.x, p.y - c.y, rx, ry) * ds), rgba))
        });
    }

    fn draw_image(&mut self, image: &RgbaImage, dest: Rect) {
        if image.width() == 0 || image.height() == 0 {
            return;
        }
        let ds = self.state.transform.scale_factor();
        let c = dest.center();
        let (hx, hy) = (dest.width * 0.5, dest.height * 0.5);
        let sx = image.width() as f32 / dest.width;
        let sy = image.height() as f32 / dest.height;
        self.fill_coverage(dest, move |p| {
            let edge = coverage(sdf_box(p.x - c.x, p.y - c.y, hx, hy) * ds);
            if edge <= 0.0 {
                return None;
            }
            let px = sample_bilinear(image, (p.x - dest.x) * sx, (p.y - dest.y) * sy);
            Some((edge, px))
        });
    }

    fn measure_text(&self, style: &TextStyle<'_>, text: &str) -> f32 {
        match self.fonts.resolve(style.family, style.weight, style.italic) {
            Some(font) => measure_line(font.font, text, style.size),
            None => fallback_measure(text, style.size),
        }
    }

    fn fill_text(
        &mut self,
        style: &TextStyle<'_>,
        text: &str,
        anchor_x: f32,
        top: f32,
        line_box: f32,
        align: TextAlign,
        color: Color,
    ) {
        let fonts = self.fonts;
        let Some(font) = fonts.resolve(style.family, style.weight, style.italic) else {
            return;
        };
        let ds = self.state.transform.scale_factor();
        if ds <= 0.0 {
            return;
        }
        let line_w = measure_line(font.font, text, style.size);
        let start = aligned_start(align, anchor_x, line_w);
        let Some(raster) = rasterize_line(&font, text, style.size, line_box, ds) else {
            return;
        };
        let pad = raster.pad as f32 / ds;
        let dest = Rect::new(
            start - pad,
            top - pad,
            raster.coverage.width() as f32 / ds,
            raster.coverage.height() as f32 / ds,
        );
        let cov_img = &raster.coverage;
        let rgba = color.0;
        self.fill_coverage(dest, move |p| {
            let cov = sample_gray_bilinear(cov_img, (p.x - dest.x) * ds, (p.y - dest.y) * ds);
            (cov > 0.0).then_some((cov, rgba))
        });
    }
}

// ============================================================================
// LAYER WALK
// ============================================================================

/// Draw one layer's content into its local box `(0, 0, width, height)`.
fn draw_layer_content<S: Surface>(surface: &mut S, layer: &Layer, bitmaps: &BitmapStore) {
    let local = Rect::new(0.0, 0.0, layer.width, layer.height);
    match &layer.content {
        LayerContent::Image(img) => match bitmaps.get(&img.source) {
            Some(bitmap) => surface.draw_image(bitmap, local),
            None => crate::log_warn!("Layer '{}' references missing bitmap {}", layer.name, img.source),
        },
        LayerContent::Text(text) => {
            let style = TextStyle::from(text);
            let lines = layout_text_layer(text, layer.width, |s| surface.measure_text(&style, s));
            let line_box = text.font_size * text.line_height;
            let anchor_x = match text.align {
                TextAlign::Left => 0.0,
                TextAlign::Center => layer.width * 0.5,
                TextAlign::Right => layer.width,
            };
            for (i, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                surface.fill_text(&style, line, anchor_x, i as f32 * line_box, line_box, text.align, text.color);
            }
        }
        LayerContent::Shape(shape) => match shape.kind {
            ShapeKind::Rectangle if shape.corner_radius > 0.0 => {
                surface.fill_rounded_rect(local, shape.corner_radius, shape.fill)
            }
            ShapeKind::Rectangle => surface.fill_rect(local, shape.fill),
            ShapeKind::Ellipse => surface.fill_ellipse(local, shape.fill),
        },
    }
}

/// Walk `layers` back-to-front (last element first) onto `surface`, with
/// `bounds` mapped to the surface origin and every unit scaled by `scale`.
pub fn render_into<S: Surface>(
    surface: &mut S,
    layers: &[Layer],
    bounds: Rect,
    background: Option<Color>,
    bitmaps: &BitmapStore,
    scale: f32,
) {
    surface.save();
    surface.scale(scale, scale);
    if let Some(bg) = background {
        surface.fill_rect(Rect::new(0.0, 0.0, bounds.width, bounds.height), bg);
    }

    for layer in layers.iter().rev().filter(|l| l.visible) {
        surface.save();
        surface.set_global_alpha(layer.opacity / 100.0);
        surface.set_blend_mode(layer.blend_mode);
        surface.translate(layer.x - bounds.x, layer.y - bounds.y);
        if layer.rotation != 0.0 {
            let (cx, cy) = (layer.width * 0.5, layer.height * 0.5);
            surface.translate(cx, cy);
            surface.rotate(layer.rotation.to_radians());
            surface.translate(-cx, -cy);
        }
        draw_layer_content(surface, layer, bitmaps);
        surface.restore();
    }
    surface.restore();
}

/// Output size for `bounds` at `scale`.
pub fn output_size(bounds: Rect, scale: f32) -> (u32, u32) {
    let w = (bounds.width * scale).ceil().max(0.0) as u32;
    let h = (bounds.height * scale).ceil().max(0.0) as u32;
    (w, h)
}

/// Render `layers` over `bounds` into a new bitmap.
pub fn render(
    layers: &[Layer],
    bounds: Rect,
    background: Option<Color>,
    resources: RenderResources<'_>,
    scale: f32,
) -> RgbaImage {
    let (w, h) = output_size(bounds, scale);
    let mut surface = SoftwareSurface::new(w, h, resources.fonts);
    render_into(&mut surface, layers, bounds, background, resources.bitmaps, scale);
    surface.into_image()
}

/// Flatten the whole canvas.  In infinite mode the bounds are the union of
/// all layers and nothing is filled behind them.
pub fn render_canvas(state: &CanvasState, resources: RenderResources<'_>, scale: f32) -> RgbaImage {
    let bounds = state
        .settings
        .bounds()
        .or_else(|| rotated_bounding_box(state.layers().iter().map(|l| (l.rect(), l.rotation))))
        .unwrap_or_default();
    render(state.layers(), bounds, state.settings.effective_background(), resources, scale)
}

/// Tight capture of several layers: bounds are their rotated bounding box.
pub fn capture_layers(
    layers: &[Layer],
    resources: RenderResources<'_>,
    scale: f32,
) -> Option<(Rect, RgbaImage)> {
    let bounds = rotated_bounding_box(layers.iter().map(|l| (l.rect(), l.rotation)))?;
    Some((bounds, render(layers, bounds, None, resources, scale)))
}

/// Capture scale for exporting a single layer: image layers at their source
/// resolution, text and shape layers at `oversample`.
pub fn capture_scale(layer: &Layer, bitmaps: &BitmapStore, oversample: f32) -> f32 {
    match &layer.content {
        LayerContent::Image(img) => match bitmaps.get(&img.source) {
            Some(bitmap) if layer.width > 0.0 => bitmap.width() as f32 / layer.width,
            _ => 1.0,
        },
        LayerContent::Text(_) | LayerContent::Shape(_) => oversample.max(1.0),
    }
}

/// Export one layer on its own.
pub fn capture_layer(layer: &Layer, resources: RenderResources<'_>, oversample: f32) -> RgbaImage {
    let scale = capture_scale(layer, resources.bitmaps, oversample);
    render(std::slice::from_ref(layer), layer.bounds(), None, resources, scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources<'a>(bitmaps: &'a BitmapStore, fonts: &'a FontBook) -> RenderResources<'a> {
        RenderResources { bitmaps, fonts }
    }

    #[test]
    fn background_only() {
        let (b, f) = (BitmapStore::new(), FontBook::new());
        let out = render(&[], Rect::new(0.0, 0.0, 4.0, 3.0), Some(Color::rgb(1, 2, 3)), resources(&b, &f), 1.0);
        assert_eq!(out.dimensions(), (4, 3));
        assert!(out.pixels().all(|p| p.0 == [1, 2, 3, 255]));
    }

    #[test]
    fn image_layer_copies_pixels_one_to_one() {
        let mut b = BitmapStore::new();
        let f = FontBook::new();
        let mut src = RgbaImage::new(3, 2);
        src.put_pixel(1, 0, Rgba([255, 0, 0, 255]));
        src.put_pixel(2, 1, Rgba([0, 0, 255, 128]));
        let key = b.insert(src.clone());
        let layer = Layer::image(key, Rect::new(5.0, 5.0, 3.0, 2.0));
        let out = render(&[layer], Rect::new(5.0, 5.0, 3.0, 2.0), None, resources(&b, &f), 1.0);
        assert_eq!(out, src);
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let (b, f) = (BitmapStore::new(), FontBook::new());
        let mut layer = Layer::shape(ShapeKind::Rectangle, Rect::new(0.0, 0.0, 4.0, 4.0), Color::BLACK);
        layer.visible = false;
        let out = render(&[layer], Rect::new(0.0, 0.0, 4.0, 4.0), None, resources(&b, &f), 1.0);
        assert!(out.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn topmost_layer_wins() {
        let (b, f) = (BitmapStore::new(), FontBook::new());
        let top = Layer::shape(ShapeKind::Rectangle, Rect::new(0.0, 0.0, 4.0, 4.0), Color::rgb(0, 255, 0));
        let bottom = Layer::shape(ShapeKind::Rectangle, Rect::new(0.0, 0.0, 4.0, 4.0), Color::rgb(255, 0, 0));
        let out = render(&[top, bottom], Rect::new(0.0, 0.0, 4.0, 4.0), None, resources(&b, &f), 1.0);
        assert_eq!(out.get_pixel(2, 2).0, [0, 255, 0, 255]);
    }

    #[test]
    fn rotation_quarter_turn_swaps_extent() {
        let (b, f) = (BitmapStore::new(), FontBook::new());
        let mut layer = Layer::shape(ShapeKind::Rectangle, Rect::new(0.0, 10.0, 40.0, 20.0), Color::BLACK);
        layer.rotation = 90.0;
        let out = render(&[layer], Rect::new(0.0, 0.0, 40.0, 40.0), None, resources(&b, &f), 1.0);
        // Rotated box spans x 10..30, y 0..40.
        assert_eq!(out.get_pixel(20, 2)[3], 255);
        assert_eq!(out.get_pixel(2, 20)[3], 0);
    }

    #[test]
    fn oversampled_capture_is_larger() {
        let (b, f) = (BitmapStore::new(), FontBook::new());
        let layer = Layer::shape(ShapeKind::Ellipse, Rect::new(3.0, 3.0, 10.0, 5.0), Color::BLACK);
        let out = capture_layer(&layer, resources(&b, &f), 4.0);
        assert_eq!(out.dimensions(), (40, 20));
    }
}
