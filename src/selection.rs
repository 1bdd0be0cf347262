//! Pixel selection for the image editor: ordered add/subtract strokes, a
//! global invert, feathering, and the per-tool drawing state machines.

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::tools::Modifiers;
use crate::geometry::{Point, Rect, flatten_cubic_bezier};
use crate::ops::filters::blur_mask;

// ============================================================================
// STROKES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrokeOp {
    Add,
    Subtract,
}

/// One user-drawn selection polygon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub op: StrokeOp,
}

impl Stroke {
    pub fn rect(rect: Rect, op: StrokeOp) -> Self {
        Stroke { points: rect.corners().to_vec(), op }
    }

    pub fn ellipse(bounds: Rect, op: StrokeOp) -> Self {
        Stroke { points: ellipse_polygon(bounds), op }
    }

    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }
}

/// How a newly drawn shape combines with the existing selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Replace,
    Add,
    Subtract,
}

impl SelectionMode {
    /// Plain drag replaces, Shift adds, Alt subtracts.
    pub fn from_modifiers(mods: Modifiers) -> Self {
        if mods.alt {
            SelectionMode::Subtract
        } else if mods.shift {
            SelectionMode::Add
        } else {
            SelectionMode::Replace
        }
    }
}

const ELLIPSE_SEGMENTS: usize = 64;

fn ellipse_polygon(bounds: Rect) -> Vec<Point> {
    let c = bounds.center();
    let rx = bounds.width * 0.5;
    let ry = bounds.height * 0.5;
    (0..ELLIPSE_SEGMENTS)
        .map(|i| {
            let t = i as f32 / ELLIPSE_SEGMENTS as f32 * std::f32::consts::TAU;
            Point::new(c.x + rx * t.cos(), c.y + ry * t.sin())
        })
        .collect()
}

// ============================================================================
// SELECTION
// ============================================================================

/// Ordered strokes plus global invert and feather radius.  No strokes and not
/// inverted means "no selection": masked operations apply everywhere.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub strokes: Vec<Stroke>,
    pub inverted: bool,
    /// Feather radius in canvas pixels.
    pub feather: f32,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.strokes.is_empty() || self.inverted
    }

    /// Append a stroke; degenerate strokes are dropped and `false` returned.
    pub fn push_stroke(&mut self, stroke: Stroke) -> bool {
        if stroke.is_degenerate() {
            return false;
        }
        self.strokes.push(stroke);
        true
    }

    /// Combine a freshly drawn polygon using `mode`.
    pub fn apply(&mut self, mode: SelectionMode, points: Vec<Point>) -> bool {
        if points.len() < 3 {
            return false;
        }
        match mode {
            SelectionMode::Replace => {
                self.strokes.clear();
                self.inverted = false;
                self.push_stroke(Stroke { points, op: StrokeOp::Add })
            }
            SelectionMode::Add => self.push_stroke(Stroke { points, op: StrokeOp::Add }),
            SelectionMode::Subtract => self.push_stroke(Stroke { points, op: StrokeOp::Subtract }),
        }
    }

    pub fn select_all(&mut self, width: u32, height: u32) {
        self.strokes = vec![Stroke::rect(
            Rect::new(0.0, 0.0, width as f32, height as f32),
            StrokeOp::Add,
        )];
        self.inverted = false;
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.inverted = false;
    }

    pub fn invert(&mut self) {
        self.inverted = !self.inverted;
    }

    pub fn set_feather(&mut self, px: f32) {
        self.feather = px.max(0.0);
    }

    /// Same selection in a canvas scaled by `factor` (preview -> export).
    pub fn scaled(&self, factor: f32) -> Selection {
        Selection {
            strokes: self
                .strokes
                .iter()
                .map(|s| Stroke { points: s.points.iter().map(|p| *p * factor).collect(), op: s.op })
                .collect(),
            inverted: self.inverted,
            feather: self.feather * factor,
        }
    }

    /// Binary coverage (0 or 255) of the combined region.  Each stroke is
    /// scan converted at pixel centers with the nonzero winding rule and
    /// applied in order; inversion complements the result.
    pub fn coverage(&self, width: u32, height: u32) -> GrayImage {
        let w = width as usize;
        let mut raw = vec![0u8; w * height as usize];
        if w == 0 {
            return GrayImage::new(width, height);
        }

        raw.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let sy = y as f32 + 0.5;
            let mut inside = vec![false; w];
            for stroke in &self.strokes {
                if stroke.is_degenerate() {
                    continue;
                }
                let value = stroke.op == StrokeOp::Add;
                for (x0, x1) in nonzero_spans(&stroke.points, sy, w) {
                    inside[x0..x1].iter_mut().for_each(|v| *v = value);
                }
            }
            for (px, covered) in row.iter_mut().zip(inside) {
                *px = if covered != self.inverted { 255 } else { 0 };
            }
        });

        GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height))
    }
}

/// Pixel spans `[x0, x1)` on scanline `sy` covered by `poly` under the
/// nonzero rule.  A pixel is inside when its center lies inside.
fn nonzero_spans(poly: &[Point], sy: f32, width: usize) -> Vec<(usize, usize)> {
    let mut crossings: Vec<(f32, i32)> = Vec::new();
    let n = poly.len();
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let dir = if a.y <= sy && sy < b.y {
            1
        } else if b.y <= sy && sy < a.y {
            -1
        } else {
            continue;
        };
        let t = (sy - a.y) / (b.y - a.y);
        crossings.push((a.x + t * (b.x - a.x), dir));
    }
    crossings.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut spans = Vec::new();
    let mut winding = 0;
    let mut span_start = 0.0f32;
    for (x, dir) in crossings {
        let was_inside = winding != 0;
        winding += dir;
        let is_inside = winding != 0;
        if !was_inside && is_inside {
            span_start = x;
        } else if was_inside && !is_inside {
            let x0 = (span_start - 0.5).ceil().clamp(0.0, width as f32) as usize;
            let x1 = (x - 0.5).ceil().clamp(0.0, width as f32) as usize;
            if x1 > x0 {
                spans.push((x0, x1));
            }
        }
    }
    spans
}

/// Alpha mask of the selection, feathered by its radius.  `None` when there
/// is no selection (operations apply globally).
pub fn compute_feathered_mask(selection: &Selection, width: u32, height: u32) -> Option<GrayImage> {
    if !selection.is_active() {
        return None;
    }
    let mask = selection.coverage(width, height);
    if selection.feather > 0.0 {
        Some(blur_mask(&mask, selection.feather))
    } else {
        Some(mask)
    }
}

// ============================================================================
// MASKED BLEND
// ============================================================================

/// `orig*(1-a) + modified*a` per channel, `a` in 0..=255.
#[inline]
pub fn mix_pixel(orig: [u8; 4], modified: [u8; 4], a: u8) -> [u8; 4] {
    match a {
        0 => orig,
        255 => modified,
        _ => {
            let a = a as u32;
            let ia = 255 - a;
            let mix = |o: u8, m: u8| ((o as u32 * ia + m as u32 * a + 127) / 255) as u8;
            [
                mix(orig[0], modified[0]),
                mix(orig[1], modified[1]),
                mix(orig[2], modified[2]),
                mix(orig[3], modified[3]),
            ]
        }
    }
}

/// Blend `modified` over `original` through `mask`.  Sizes must match;
/// otherwise `modified` is returned unchanged.
pub fn blend_through_mask(original: &RgbaImage, modified: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    let (w, h) = original.dimensions();
    if modified.dimensions() != (w, h) || mask.dimensions() != (w, h) {
        crate::log_warn!("blend_through_mask: size mismatch, mask ignored");
        return modified.clone();
    }
    let stride = w as usize * 4;
    let mut out = modified.clone();
    let orig_raw = original.as_raw();
    let mask_raw = mask.as_raw();
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..w as usize {
            let a = mask_raw[y * w as usize + x];
            if a == 255 {
                continue;
            }
            let i = x * 4;
            let o = y * stride + i;
            let orig = [orig_raw[o], orig_raw[o + 1], orig_raw[o + 2], orig_raw[o + 3]];
            let m = [row[i], row[i + 1], row[i + 2], row[i + 3]];
            row[i..i + 4].copy_from_slice(&mix_pixel(orig, m, a));
        }
    });
    out
}

// ============================================================================
// TOOL STATE MACHINES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionTool {
    Lasso,
    Marquee,
    Ellipse,
    Pen,
}

/// Pen anchor with optional tangent handles (mirrored through the anchor).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PenNode {
    pub anchor: Point,
    pub handle_in: Option<Point>,
    pub handle_out: Option<Point>,
}

#[derive(Clone, Debug, Default)]
enum ToolPhase {
    #[default]
    Idle,
    Drawing {
        mode: SelectionMode,
        start: Point,
        current: Point,
        points: Vec<Point>,
    },
    Pen {
        mode: SelectionMode,
        nodes: Vec<PenNode>,
        dragging: bool,
    },
}

/// A polygon ready to be combined into the selection.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionCommit {
    pub mode: SelectionMode,
    pub points: Vec<Point>,
}

/// `idle -> drawing -> committed` for lasso/marquee/ellipse; multi-click
/// anchor placement for the pen.  Coordinates are canvas pixels.
#[derive(Clone, Debug)]
pub struct SelectionToolState {
    tool: SelectionTool,
    phase: ToolPhase,
    /// Close distance for the pen's first anchor (canvas px).
    pub close_threshold: f32,
}

impl SelectionToolState {
    pub fn new(tool: SelectionTool, close_threshold: f32) -> Self {
        Self { tool, phase: ToolPhase::Idle, close_threshold }
    }

    pub fn tool(&self) -> SelectionTool {
        self.tool
    }

    /// Switch tools, abandoning any in-progress shape.
    pub fn set_tool(&mut self, tool: SelectionTool) {
        self.tool = tool;
        self.phase = ToolPhase::Idle;
    }

    pub fn cancel(&mut self) {
        self.phase = ToolPhase::Idle;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, ToolPhase::Idle)
    }

    pub fn pen_nodes(&self) -> &[PenNode] {
        match &self.phase {
            ToolPhase::Pen { nodes, .. } => nodes,
            _ => &[],
        }
    }

    pub fn pointer_down(&mut self, p: Point, mods: Modifiers) -> Option<SelectionCommit> {
        let close_threshold = self.close_threshold;
        if let ToolPhase::Pen { mode, nodes, dragging } = &mut self.phase {
            if nodes.len() >= 3 && nodes[0].anchor.distance(p) <= close_threshold {
                let commit = SelectionCommit { mode: *mode, points: flatten_pen_path(nodes) };
                self.phase = ToolPhase::Idle;
                return Some(commit);
            }
            nodes.push(PenNode { anchor: p, handle_in: None, handle_out: None });
            *dragging = true;
            return None;
        }
        if !self.is_idle() {
            return None;
        }

        let mode = SelectionMode::from_modifiers(mods);
        self.phase = match self.tool {
            SelectionTool::Pen => ToolPhase::Pen {
                mode,
                nodes: vec![PenNode { anchor: p, handle_in: None, handle_out: None }],
                dragging: true,
            },
            _ => ToolPhase::Drawing { mode, start: p, current: p, points: vec![p] },
        };
        None
    }

    pub fn pointer_move(&mut self, p: Point) {
        match &mut self.phase {
            ToolPhase::Drawing { current, points, .. } => {
                *current = p;
                if self.tool == SelectionTool::Lasso
                    && points.last().is_none_or(|last| last.distance(p) >= 1.0)
                {
                    points.push(p);
                }
            }
            ToolPhase::Pen { nodes, dragging: true, .. } => {
                if let Some(node) = nodes.last_mut() {
                    if node.anchor.distance(p) > 1.0 {
                        node.handle_out = Some(p);
                        node.handle_in = Some(p.mirrored_through(node.anchor));
                    } else {
                        node.handle_out = None;
                        node.handle_in = None;
                    }
                }
            }
            _ => {}
        }
    }

    pub fn pointer_up(&mut self, p: Point) -> Option<SelectionCommit> {
        self.pointer_move(p);
        match std::mem::take(&mut self.phase) {
            ToolPhase::Drawing { mode, start, current, points } => {
                let polygon = match self.tool {
                    SelectionTool::Lasso => points,
                    SelectionTool::Marquee => Rect::from_points(start, current).corners().to_vec(),
                    SelectionTool::Ellipse => {
                        let r = Rect::from_points(start, current);
                        if r.is_empty() { Vec::new() } else { ellipse_polygon(r) }
                    }
                    SelectionTool::Pen => Vec::new(),
                };
                let r = Rect::from_points(start, current);
                let degenerate = polygon.len() < 3
                    || (self.tool != SelectionTool::Lasso && r.is_empty());
                (!degenerate).then_some(SelectionCommit { mode, points: polygon })
            }
            ToolPhase::Pen { mode, nodes, .. } => {
                self.phase = ToolPhase::Pen { mode, nodes, dragging: false };
                None
            }
            ToolPhase::Idle => None,
        }
    }

    /// Outline of the shape being drawn, for the overlay.
    pub fn preview_polygon(&self) -> Option<Vec<Point>> {
        match &self.phase {
            ToolPhase::Idle => None,
            ToolPhase::Drawing { start, current, points, .. } => Some(match self.tool {
                SelectionTool::Lasso => points.clone(),
                SelectionTool::Ellipse => ellipse_polygon(Rect::from_points(*start, *current)),
                _ => Rect::from_points(*start, *current).corners().to_vec(),
            }),
            ToolPhase::Pen { nodes, .. } => Some(flatten_open_pen_path(nodes)),
        }
    }
}

fn pen_segment(a: &PenNode, b: &PenNode) -> Vec<Point> {
    if a.handle_out.is_none() && b.handle_in.is_none() {
        return vec![a.anchor, b.anchor];
    }
    flatten_cubic_bezier(
        a.anchor,
        a.handle_out.unwrap_or(a.anchor),
        b.handle_in.unwrap_or(b.anchor),
        b.anchor,
    )
}

fn flatten_open_pen_path(nodes: &[PenNode]) -> Vec<Point> {
    let mut out: Vec<Point> = nodes.first().map(|n| vec![n.anchor]).unwrap_or_default();
    for pair in nodes.windows(2) {
        out.extend(pen_segment(&pair[0], &pair[1]).into_iter().skip(1));
    }
    out
}

/// Closed polygon through every anchor, curved where handles exist.
fn flatten_pen_path(nodes: &[PenNode]) -> Vec<Point> {
    let n = nodes.len();
    let mut out = Vec::new();
    for i in 0..n {
        let seg = pen_segment(&nodes[i], &nodes[(i + 1) % n]);
        out.extend_from_slice(&seg[..seg.len() - 1]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_centers_decide_coverage() {
        let mut sel = Selection::new();
        sel.push_stroke(Stroke::rect(Rect::new(10.0, 10.0, 10.0, 10.0), StrokeOp::Add));
        let m = sel.coverage(30, 30);
        assert_eq!(m.get_pixel(10, 10)[0], 255);
        assert_eq!(m.get_pixel(19, 19)[0], 255);
        assert_eq!(m.get_pixel(20, 19)[0], 0);
        assert_eq!(m.get_pixel(9, 10)[0], 0);
    }

    #[test]
    fn inverted_empty_selection_covers_everything() {
        let inverted = Selection { inverted: true, ..Selection::default() };
        assert!(inverted.is_active());
        let mut all = Selection::new();
        all.push_stroke(Stroke::rect(Rect::new(0.0, 0.0, 13.0, 7.0), StrokeOp::Add));

        let a = inverted.coverage(13, 7);
        let b = all.coverage(13, 7);
        assert_eq!(a.dimensions(), b.dimensions());
        for ((x, y, pa), pb) in a.enumerate_pixels().zip(b.pixels()) {
            assert_eq!(pa[0], pb[0], "({}, {})", x, y);
            assert_eq!(pa[0], 255, "({}, {})", x, y);
        }
    }

    #[test]
    fn subtract_carves_hole_without_spilling() {
        let mut sel = Selection::new();
        sel.push_stroke(Stroke::rect(Rect::new(0.0, 0.0, 20.0, 20.0), StrokeOp::Add));
        sel.push_stroke(Stroke::rect(Rect::new(10.0, 10.0, 20.0, 20.0), StrokeOp::Subtract));
        let m = sel.coverage(40, 40);
        assert_eq!(m.get_pixel(5, 5)[0], 255);
        assert_eq!(m.get_pixel(15, 15)[0], 0);
        // Outside the add stroke but inside the subtract one stays empty.
        assert_eq!(m.get_pixel(25, 25)[0], 0);
    }

    #[test]
    fn self_intersecting_lasso_uses_nonzero() {
        // A bow-tie traced twice around the same loop.
        let square = Rect::new(0.0, 0.0, 10.0, 10.0).corners().to_vec();
        let mut twice = square.clone();
        twice.extend(square);
        let mut sel = Selection::new();
        sel.push_stroke(Stroke { points: twice, op: StrokeOp::Add });
        assert_eq!(sel.coverage(10, 10).get_pixel(5, 5)[0], 255);
    }

    #[test]
    fn short_strokes_are_dropped() {
        let mut sel = Selection::new();
        assert!(!sel.push_stroke(Stroke {
            points: vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)],
            op: StrokeOp::Add,
        }));
        assert!(!sel.is_active());
        assert!(compute_feathered_mask(&sel, 10, 10).is_none());
    }

    #[test]
    fn feather_softens_edge() {
        let mut sel = Selection::new();
        sel.push_stroke(Stroke::rect(Rect::new(0.0, 0.0, 10.0, 20.0), StrokeOp::Add));
        sel.set_feather(2.0);
        let m = compute_feathered_mask(&sel, 20, 20).unwrap();
        let edge = m.get_pixel(10, 10)[0];
        assert!(edge > 0 && edge < 255);
        assert_eq!(m.get_pixel(19, 10)[0], 0);
    }

    #[test]
    fn mix_pixel_endpoints() {
        let a = [10, 20, 30, 40];
        let b = [200, 100, 50, 255];
        assert_eq!(mix_pixel(a, b, 0), a);
        assert_eq!(mix_pixel(a, b, 255), b);
        assert_eq!(mix_pixel([0, 0, 0, 0], [255, 255, 255, 255], 128)[0], 128);
    }

    #[test]
    fn marquee_tool_commits_rectangle() {
        let mut tool = SelectionToolState::new(SelectionTool::Marquee, 8.0);
        tool.pointer_down(Point::new(2.0, 2.0), Modifiers::default());
        tool.pointer_move(Point::new(8.0, 6.0));
        let commit = tool.pointer_up(Point::new(12.0, 9.0)).unwrap();
        assert_eq!(commit.mode, SelectionMode::Replace);
        assert_eq!(commit.points[2], Point::new(12.0, 9.0));
        assert!(tool.is_idle());
    }

    #[test]
    fn click_without_drag_commits_nothing() {
        let mut tool = SelectionToolState::new(SelectionTool::Ellipse, 8.0);
        tool.pointer_down(Point::new(2.0, 2.0), Modifiers::default());
        assert!(tool.pointer_up(Point::new(2.0, 2.0)).is_none());
    }

    #[test]
    fn pen_closes_on_first_anchor() {
        let mut tool = SelectionToolState::new(SelectionTool::Pen, 8.0);
        let alt = Modifiers { alt: true, ..Modifiers::default() };
        for p in [Point::new(0.0, 0.0), Point::new(50.0, 0.0), Point::new(50.0, 50.0)] {
            assert!(tool.pointer_down(p, alt).is_none());
            tool.pointer_up(p);
        }
        // Drag the fourth anchor to give it curved handles.
        tool.pointer_down(Point::new(0.0, 50.0), alt);
        tool.pointer_move(Point::new(-10.0, 40.0));
        tool.pointer_up(Point::new(-10.0, 40.0));
        assert_eq!(tool.pen_nodes().len(), 4);
        assert_eq!(tool.pen_nodes()[3].handle_in, Some(Point::new(10.0, 60.0)));

        let commit = tool.pointer_down(Point::new(3.0, 2.0), alt).unwrap();
        assert_eq!(commit.mode, SelectionMode::Subtract);
        assert!(commit.points.len() > 4);
        assert!(tool.is_idle());
    }
}
