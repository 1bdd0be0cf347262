//! Raster image editor: a base bitmap plus paint, adjustments, blur and a
//! pixel selection, rendered identically at preview and export resolution.
//!
//! Coordinates passed in by the host (crop rects, quads, paint strokes,
//! selection points) are in preview-canvas pixels.  Geometry edits are
//! destructive: they flatten pending paint into the base first, then clear
//! the paint layer and the selection.

use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{BlendMode, Color, blend_pixel};
use crate::components::history::{HistoryManager, HistoryState};
use crate::components::tools::Modifiers;
use crate::geometry::{Point, Rect};
use crate::io::{EditorError, decode_layer_bitmap, encode_png};
use crate::ops::adjustments::{Adjustments, apply_adjustments};
use crate::ops::filters::blur_through_mask;
use crate::ops::shapes::{coverage, sdf_segment};
use crate::ops::transform::{self, Interpolation};
use crate::selection::{Selection, SelectionTool, SelectionToolState, compute_feathered_mask};
use crate::settings::EditorSettings;

/// Fixed so preview and export draw the same grain field.
const GRAIN_SEED: u32 = 0x5EED_0001;

// ============================================================================
// EDIT STATE
// ============================================================================

/// One history entry.  Bitmaps are shared; pixels are only compared when
/// the pointers differ.
#[derive(Clone, Debug)]
pub struct EditState {
    pub base: Arc<RgbaImage>,
    /// Painted pixels at preview resolution.
    pub paint: Option<Arc<RgbaImage>>,
    pub adjustments: Adjustments,
    /// Gaussian sigma in the rendered canvas's own pixels.
    pub blur: f32,
    pub selection: Selection,
}

impl PartialEq for EditState {
    fn eq(&self, other: &Self) -> bool {
        let paint_eq = match (&self.paint, &other.paint) {
            (Some(a), Some(b)) => same_pixels(a, b),
            (None, None) => true,
            _ => false,
        };
        same_pixels(&self.base, &other.base)
            && paint_eq
            && self.adjustments == other.adjustments
            && self.blur == other.blur
            && self.selection == other.selection
    }
}

fn same_pixels(a: &Arc<RgbaImage>, b: &Arc<RgbaImage>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

impl HistoryState for EditState {
    fn memory_size(&self) -> usize {
        let paint = self.paint.as_ref().map_or(0, |p| p.as_raw().len());
        self.base.as_raw().len() + paint + std::mem::size_of::<Self>()
    }
}

impl EditState {
    fn new(base: RgbaImage) -> Self {
        Self {
            base: Arc::new(base),
            paint: None,
            adjustments: Adjustments::default(),
            blur: 0.0,
            selection: Selection::new(),
        }
    }
}

/// Composite `paint` over `img`, resampling it to `img`'s size.
fn apply_paint(img: &mut RgbaImage, paint: &RgbaImage) {
    let (w, h) = img.dimensions();
    let scaled;
    let paint = if paint.dimensions() == (w, h) {
        paint
    } else {
        scaled = transform::resize(paint, w, h, Interpolation::Bilinear);
        &scaled
    };
    let stride = w as usize * 4;
    let src = paint.as_raw();
    img.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let src_row = &src[y * stride..(y + 1) * stride];
        for (dst, top) in row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            if top[3] == 0 {
                continue;
            }
            let out = blend_pixel(
                Rgba([dst[0], dst[1], dst[2], dst[3]]),
                Rgba([top[0], top[1], top[2], top[3]]),
                BlendMode::Normal,
                1.0,
            );
            dst.copy_from_slice(&out.0);
        }
    });
}

/// Stamp a round-capped polyline onto `canvas`.  `color = None` erases.
fn stamp_stroke(canvas: &mut RgbaImage, points: &[Point], radius: f32, color: Option<Color>) {
    let Some(first) = points.first() else { return };
    let (w, h) = canvas.dimensions();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let pad = radius + 1.0;
    let x0 = (min_x - pad).floor().max(0.0) as usize;
    let y0 = (min_y - pad).floor().max(0.0) as usize;
    let x1 = ((max_x + pad).ceil().max(0.0) as usize).min(w as usize);
    let y1 = ((max_y + pad).ceil().max(0.0) as usize).min(h as usize);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let segments: Vec<(Point, Point)> = if points.len() == 1 {
        vec![(*first, *first)]
    } else {
        points.windows(2).map(|s| (s[0], s[1])).collect()
    };
    let stride = w as usize * 4;

    canvas
        .par_chunks_mut(stride)
        .enumerate()
        .skip(y0)
        .take(y1 - y0)
        .for_each(|(y, row)| {
            let py = y as f32 + 0.5;
            for x in x0..x1 {
                let px = x as f32 + 0.5;
                let d = segments
                    .iter()
                    .map(|(a, b)| sdf_segment(px, py, a.x, a.y, b.x, b.y))
                    .fold(f32::INFINITY, f32::min);
                let cov = coverage(d - radius);
                if cov <= 0.0 {
                    continue;
                }
                let i = x * 4;
                match color {
                    Some(c) => {
                        let top = Rgba([c.0[0], c.0[1], c.0[2], (c.0[3] as f32 * cov).round() as u8]);
                        let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                        let out = blend_pixel(base, top, BlendMode::Normal, 1.0);
                        row[i..i + 4].copy_from_slice(&out.0);
                    }
                    None => {
                        row[i + 3] = (row[i + 3] as f32 * (1.0 - cov)).round() as u8;
                    }
                }
            }
        });
}

// ============================================================================
// EDITOR SESSION
// ============================================================================

pub struct ImageEditor {
    state: EditState,
    history: HistoryManager<EditState>,
    preview_max_edge: u32,
    selection_tool: SelectionToolState,
}

impl ImageEditor {
    pub fn new(base: RgbaImage, settings: &EditorSettings) -> Self {
        let state = EditState::new(base);
        Self {
            history: HistoryManager::new(state.clone(), settings.max_undo_steps),
            state,
            preview_max_edge: settings.preview_max_edge,
            selection_tool: SelectionToolState::new(SelectionTool::Marquee, settings.pen_close_threshold),
        }
    }

    pub fn from_bytes(bytes: &[u8], settings: &EditorSettings) -> Result<Self, EditorError> {
        Ok(Self::new(decode_layer_bitmap(bytes)?, settings))
    }

    pub fn state(&self) -> &EditState {
        &self.state
    }

    pub fn base(&self) -> &RgbaImage {
        &self.state.base
    }

    pub fn history(&self) -> &HistoryManager<EditState> {
        &self.history
    }

    /// Preview canvas size and its scale relative to the base.
    pub fn preview_size(&self) -> (u32, u32, f32) {
        let (w, h) = self.state.base.dimensions();
        let longest = w.max(h);
        if longest <= self.preview_max_edge || longest == 0 {
            return (w, h, 1.0);
        }
        let scale = self.preview_max_edge as f32 / longest as f32;
        let pw = ((w as f32 * scale).round() as u32).max(1);
        let ph = ((h as f32 * scale).round() as u32).max(1);
        (pw, ph, scale)
    }

    fn commit(&mut self, description: &str) -> bool {
        self.history.commit(description, self.state.clone())
    }

    // --- geometry ---

    /// Flatten paint into the base so geometry edits carry it along.
    fn base_with_paint(&self) -> RgbaImage {
        let mut img = (*self.state.base).clone();
        if let Some(paint) = &self.state.paint {
            apply_paint(&mut img, paint);
        }
        img
    }

    fn replace_base(&mut self, base: RgbaImage, description: &str) -> bool {
        if base.width() == 0 || base.height() == 0 {
            return false;
        }
        self.state.base = Arc::new(base);
        self.state.paint = None;
        self.state.selection.clear();
        self.selection_tool.cancel();
        self.commit(description)
    }

    pub fn rotate(&mut self, quarter_turns: i32) -> bool {
        if quarter_turns.rem_euclid(4) == 0 {
            return false;
        }
        let img = transform::rotate_quarter_turns(&self.base_with_paint(), quarter_turns);
        self.replace_base(img, "Rotate")
    }

    pub fn flip(&mut self, horizontal: bool, vertical: bool) -> bool {
        if !horizontal && !vertical {
            return false;
        }
        let img = transform::flip(&self.base_with_paint(), horizontal, vertical);
        self.replace_base(img, "Flip")
    }

    /// Crop to `rect` given in preview pixels.
    pub fn crop(&mut self, rect: Rect) -> bool {
        let (_, _, scale) = self.preview_size();
        let inv = 1.0 / scale;
        let full = Rect::new(rect.x * inv, rect.y * inv, rect.width * inv, rect.height * inv);
        let Some(img) = transform::crop(&self.base_with_paint(), full) else {
            crate::log_warn!("Crop rejected: empty region");
            return false;
        };
        self.replace_base(img, "Crop")
    }

    /// Perspective-correct the quad (TL, TR, BR, BL in preview pixels).
    pub fn perspective_crop(&mut self, quad: [Point; 4]) -> bool {
        let (_, _, scale) = self.preview_size();
        let full = quad.map(|p| p * (1.0 / scale));
        let Some(img) = transform::perspective_crop(&self.base_with_paint(), &full) else {
            crate::log_warn!("Perspective crop rejected: degenerate quad");
            return false;
        };
        self.replace_base(img, "Perspective Crop")
    }

    // --- paint ---

    fn paint_canvas(&mut self) -> &mut RgbaImage {
        let (w, h, _) = self.preview_size();
        let paint = self.state.paint.get_or_insert_with(|| Arc::new(RgbaImage::new(w, h)));
        Arc::make_mut(paint)
    }

    /// Draw a brush stroke; `size` is the diameter in preview pixels.
    pub fn paint_stroke(&mut self, points: &[Point], color: Color, size: f32) -> bool {
        if points.is_empty() || size <= 0.0 {
            return false;
        }
        stamp_stroke(self.paint_canvas(), points, size * 0.5, Some(color));
        self.commit("Paint")
    }

    /// Erase painted pixels (never the base).
    pub fn erase_stroke(&mut self, points: &[Point], size: f32) -> bool {
        if points.is_empty() || size <= 0.0 || self.state.paint.is_none() {
            return false;
        }
        stamp_stroke(self.paint_canvas(), points, size * 0.5, None);
        self.commit("Erase")
    }

    pub fn clear_paint(&mut self) -> bool {
        self.state.paint.take().is_some() && self.commit("Clear Paint")
    }

    // --- filters ---

    /// Live while a slider is dragged, recorded when `is_final`.
    pub fn set_adjustments(&mut self, adjustments: Adjustments, is_final: bool) -> bool {
        self.state.adjustments = adjustments;
        is_final && self.commit("Adjust")
    }

    pub fn set_adjustment(&mut self, key: &str, value: &str) -> Result<bool, EditorError> {
        let mut adj = self.state.adjustments.clone();
        adj.set(key, value)?;
        Ok(self.set_adjustments(adj, true))
    }

    pub fn set_blur(&mut self, sigma: f32, is_final: bool) -> bool {
        self.state.blur = sigma.max(0.0);
        is_final && self.commit("Blur")
    }

    // --- selection ---

    pub fn selection(&self) -> &Selection {
        &self.state.selection
    }

    pub fn selection_tool(&self) -> &SelectionToolState {
        &self.selection_tool
    }

    pub fn set_selection_tool(&mut self, tool: SelectionTool) {
        self.selection_tool.set_tool(tool);
    }

    pub fn selection_pointer_down(&mut self, p: Point, mods: Modifiers) -> bool {
        match self.selection_tool.pointer_down(p, mods) {
            Some(commit) => self.state.selection.apply(commit.mode, commit.points) && self.commit("Select"),
            None => false,
        }
    }

    pub fn selection_pointer_move(&mut self, p: Point) {
        self.selection_tool.pointer_move(p);
    }

    pub fn selection_pointer_up(&mut self, p: Point) -> bool {
        match self.selection_tool.pointer_up(p) {
            Some(commit) => self.state.selection.apply(commit.mode, commit.points) && self.commit("Select"),
            None => false,
        }
    }

    pub fn select_all(&mut self) -> bool {
        let (w, h, _) = self.preview_size();
        self.state.selection.select_all(w, h);
        self.commit("Select All")
    }

    pub fn clear_selection(&mut self) -> bool {
        self.state.selection.clear();
        self.commit("Deselect")
    }

    pub fn invert_selection(&mut self) -> bool {
        self.state.selection.invert();
        self.commit("Invert Selection")
    }

    pub fn set_feather(&mut self, px: f32) -> bool {
        self.state.selection.set_feather(px);
        self.commit("Feather")
    }

    // --- rendering ---

    fn render_at(&self, mut img: RgbaImage, selection_scale: f32) -> RgbaImage {
        if let Some(paint) = &self.state.paint {
            apply_paint(&mut img, paint);
        }
        let (w, h) = img.dimensions();
        let mask = compute_feathered_mask(&self.state.selection.scaled(selection_scale), w, h);
        let adj = &self.state.adjustments;
        if !adj.is_identity() {
            img = apply_adjustments(&img, adj, mask.as_ref(), GRAIN_SEED);
        }
        blur_through_mask(&img, self.state.blur, mask.as_ref())
    }

    pub fn render_preview(&self) -> RgbaImage {
        let (w, h, _) = self.preview_size();
        let img = transform::resize(&self.state.base, w, h, Interpolation::Bilinear);
        self.render_at(img, 1.0)
    }

    /// Full-resolution render: paint and selection are scaled up from the
    /// preview canvas; filter parameters are unchanged.
    pub fn render_export(&self) -> RgbaImage {
        let (_, _, scale) = self.preview_size();
        self.render_at((*self.state.base).clone(), 1.0 / scale)
    }

    pub fn export_png(&self) -> Result<Vec<u8>, EditorError> {
        encode_png(&self.render_export())
    }

    /// Flatten everything into a new base and reset the edit stack.
    pub fn bake(&mut self) -> bool {
        let flat = self.render_export();
        self.state.adjustments = Adjustments::default();
        self.state.blur = 0.0;
        self.replace_base(flat, "Bake")
    }

    // --- history ---

    pub fn undo(&mut self) -> bool {
        let Some(state) = self.history.undo().cloned() else { return false };
        self.state = state;
        self.selection_tool.cancel();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(state) = self.history.redo().cloned() else { return false };
        self.state = state;
        self.selection_tool.cancel();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(c))
    }

    fn settings(preview_max_edge: u32) -> EditorSettings {
        EditorSettings { preview_max_edge, ..EditorSettings::default() }
    }

    #[test]
    fn preview_is_downscaled() {
        let ed = ImageEditor::new(solid(400, 200, [10, 20, 30, 255]), &settings(100));
        assert_eq!(ed.preview_size(), (100, 50, 0.25));
        assert_eq!(ed.render_preview().dimensions(), (100, 50));
        assert_eq!(ed.render_export().dimensions(), (400, 200));
    }

    #[test]
    fn crop_uses_preview_coordinates() {
        let mut ed = ImageEditor::new(solid(400, 200, [10, 20, 30, 255]), &settings(100));
        assert!(ed.crop(Rect::new(10.0, 10.0, 20.0, 10.0)));
        assert_eq!(ed.base().dimensions(), (80, 40));
        assert!(ed.undo());
        assert_eq!(ed.base().dimensions(), (400, 200));
    }

    #[test]
    fn paint_scales_to_export() {
        let mut ed = ImageEditor::new(solid(200, 200, [255, 255, 255, 255]), &settings(100));
        assert!(ed.paint_stroke(&[Point::new(50.0, 50.0)], Color::BLACK, 20.0));
        let preview = ed.render_preview();
        assert_eq!(preview.get_pixel(50, 50).0, [0, 0, 0, 255]);
        assert_eq!(preview.get_pixel(5, 5).0, [255, 255, 255, 255]);
        let export = ed.render_export();
        assert_eq!(export.get_pixel(100, 100).0, [0, 0, 0, 255]);
        assert_eq!(export.get_pixel(10, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn adjustments_respect_selection() {
        let mut ed = ImageEditor::new(solid(10, 10, [200, 100, 50, 255]), &settings(100));
        ed.state.selection.push_stroke(crate::selection::Stroke::rect(
            Rect::new(0.0, 0.0, 5.0, 10.0),
            crate::selection::StrokeOp::Add,
        ));
        let adj = Adjustments { invert: true, ..Adjustments::default() };
        assert!(ed.set_adjustments(adj, true));
        let out = ed.render_preview();
        assert_eq!(out.get_pixel(2, 5).0, [55, 155, 205, 255]);
        assert_eq!(out.get_pixel(7, 5).0, [200, 100, 50, 255]);
    }

    #[test]
    fn bake_resets_stack_and_undoes() {
        let mut ed = ImageEditor::new(solid(10, 10, [200, 100, 50, 255]), &settings(100));
        ed.set_adjustments(Adjustments { invert: true, ..Adjustments::default() }, true);
        assert!(ed.bake());
        assert!(ed.state().adjustments.is_identity());
        assert_eq!(ed.base().get_pixel(0, 0).0, [55, 155, 205, 255]);
        assert!(ed.undo());
        assert_eq!(ed.base().get_pixel(0, 0).0, [200, 100, 50, 255]);
        assert!(ed.state().adjustments.invert);
    }

    #[test]
    fn live_adjustment_is_not_recorded() {
        let mut ed = ImageEditor::new(solid(4, 4, [1, 2, 3, 255]), &settings(100));
        let before = ed.history().len();
        assert!(!ed.set_adjustments(Adjustments { contrast: 10.0, ..Adjustments::default() }, false));
        assert_eq!(ed.history().len(), before);
        assert!(!ed.rotate(4));
    }

    #[test]
    fn erase_only_touches_paint() {
        let mut ed = ImageEditor::new(solid(20, 20, [255, 255, 255, 255]), &settings(100));
        assert!(!ed.erase_stroke(&[Point::new(10.0, 10.0)], 6.0));
        ed.paint_stroke(&[Point::new(10.0, 10.0)], Color::BLACK, 6.0);
        assert!(ed.erase_stroke(&[Point::new(10.0, 10.0)], 10.0));
        assert_eq!(ed.render_preview().get_pixel(10, 10).0, [255, 255, 255, 255]);
        assert!(ed.undo());
        assert_eq!(ed.render_preview().get_pixel(10, 10).0, [0, 0, 0, 255]);
    }

    #[test]
    fn erasing_blank_paint_is_not_recorded() {
        let mut ed = ImageEditor::new(solid(20, 20, [255, 255, 255, 255]), &settings(100));
        assert!(ed.paint_stroke(&[Point::new(15.0, 15.0)], Color::BLACK, 4.0));
        let len = ed.history().len();
        assert!(!ed.erase_stroke(&[Point::new(2.0, 2.0)], 2.0));
        assert_eq!(ed.history().len(), len);
        assert!(ed.undo());
        assert_eq!(ed.render_preview().get_pixel(15, 15).0, [255, 255, 255, 255]);
    }

    #[test]
    fn marquee_drag_commits_selection() {
        let mut ed = ImageEditor::new(solid(50, 50, [0, 0, 0, 255]), &settings(100));
        ed.set_selection_tool(SelectionTool::Marquee);
        assert!(!ed.selection_pointer_down(Point::new(5.0, 5.0), Modifiers::NONE));
        ed.selection_pointer_move(Point::new(20.0, 20.0));
        assert!(ed.selection_pointer_up(Point::new(20.0, 20.0)));
        assert!(ed.selection().is_active());
        assert!(ed.invert_selection());
        assert!(ed.selection().inverted);
        assert!(ed.undo());
        assert!(!ed.selection().inverted);
    }

    #[test]
    fn rotation_carries_paint() {
        let mut ed = ImageEditor::new(solid(20, 10, [255, 255, 255, 255]), &settings(100));
        ed.paint_stroke(&[Point::new(2.0, 2.0)], Color::BLACK, 3.0);
        assert!(ed.rotate(1));
        assert!(ed.state().paint.is_none());
        assert_eq!(ed.base().dimensions(), (10, 20));
        // (2, 2) in the original lands at (w - 1 - 2, 2) after a clockwise turn
        assert_eq!(ed.base().get_pixel(7, 2).0, [0, 0, 0, 255]);
    }
}
