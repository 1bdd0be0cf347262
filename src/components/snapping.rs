//! Edge/center snapping for move and resize gestures.

use crate::geometry::{Axis, Rect};

/// Coincidences closer than this are considered aligned when emitting guides.
const GUIDE_TOLERANCE: f32 = 0.01;

/// Transient alignment indicator.  For `Axis::X` the guide is a vertical
/// line at `x = position` running from `start` to `end` in y; for `Axis::Y`
/// it is horizontal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Guide {
    pub axis: Axis,
    pub position: f32,
    pub start: f32,
    pub end: f32,
}

/// Which of a box's `[min, center, max]` lines may snap on each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapEdges {
    pub x: [bool; 3],
    pub y: [bool; 3],
}

impl SnapEdges {
    pub const ALL: SnapEdges = SnapEdges { x: [true; 3], y: [true; 3] };

    pub fn any(&self, axis: Axis) -> bool {
        self.on(axis).iter().any(|b| *b)
    }

    fn on(&self, axis: Axis) -> [bool; 3] {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapResult {
    pub dx: f32,
    pub dy: f32,
    pub guides: Vec<Guide>,
}

impl SnapResult {
    pub fn has_guide(&self, axis: Axis) -> bool {
        self.guides.iter().any(|g| g.axis == axis)
    }
}

fn lines(r: &Rect, axis: Axis) -> [f32; 3] {
    match axis {
        Axis::X => [r.x, r.x + r.width * 0.5, r.right()],
        Axis::Y => [r.y, r.y + r.height * 0.5, r.bottom()],
    }
}

/// Extent of `r` along the axis perpendicular to a guide on `axis`.
fn span(r: &Rect, axis: Axis) -> (f32, f32) {
    match axis {
        Axis::X => (r.y, r.bottom()),
        Axis::Y => (r.x, r.right()),
    }
}

/// Closest snap offset on one axis.  Ties keep the first candidate found.
fn best_offset(moving: &Rect, targets: &[Rect], axis: Axis, threshold: f32, edges: [bool; 3]) -> Option<f32> {
    let moving_lines = lines(moving, axis);
    let mut best: Option<f32> = None;
    for target in targets {
        for t in lines(target, axis) {
            for (m, enabled) in moving_lines.iter().zip(edges) {
                if !enabled {
                    continue;
                }
                let d = t - m;
                if d.abs() <= threshold && best.is_none_or(|b| d.abs() < b.abs()) {
                    best = Some(d);
                }
            }
        }
    }
    best
}

fn collect_guides(snapped: &Rect, targets: &[Rect], axis: Axis, edges: [bool; 3], out: &mut Vec<Guide>) {
    let moving_lines = lines(snapped, axis);
    let (ms, me) = span(snapped, axis);
    for target in targets {
        let (ts, te) = span(target, axis);
        for t in lines(target, axis) {
            let aligned = moving_lines
                .iter()
                .zip(edges)
                .any(|(m, enabled)| enabled && (t - m).abs() <= GUIDE_TOLERANCE);
            if !aligned {
                continue;
            }
            let (start, end) = (ms.min(ts), me.max(te));
            match out.iter_mut().find(|g| g.axis == axis && (g.position - t).abs() <= GUIDE_TOLERANCE) {
                Some(g) => {
                    g.start = g.start.min(start);
                    g.end = g.end.max(end);
                }
                None => out.push(Guide { axis, position: t, start, end }),
            }
        }
    }
}

/// Snap `moving` against `targets` (other layers' bounds) and, when the
/// canvas is finite, the canvas edges and center lines.  Each axis picks its
/// single closest candidate within `threshold`.
pub fn snap_rect(moving: Rect, targets: &[Rect], canvas: Option<Rect>, threshold: f32, edges: SnapEdges) -> SnapResult {
    let mut all: Vec<Rect> = targets.to_vec();
    all.extend(canvas);

    let dx = if edges.any(Axis::X) {
        best_offset(&moving, &all, Axis::X, threshold, edges.x).unwrap_or(0.0)
    } else {
        0.0
    };
    let dy = if edges.any(Axis::Y) {
        best_offset(&moving, &all, Axis::Y, threshold, edges.y).unwrap_or(0.0)
    } else {
        0.0
    };

    let snapped = moving.translated(dx, dy);
    let mut guides = Vec::new();
    collect_guides(&snapped, &all, Axis::X, edges.x, &mut guides);
    collect_guides(&snapped, &all, Axis::Y, edges.y, &mut guides);
    SnapResult { dx, dy, guides }
}

/// Round to the nearest multiple of `size` (no-op for `size <= 0`).
pub fn snap_to_grid(value: f32, size: f32) -> f32 {
    if size <= 0.0 {
        return value;
    }
    (value / size).round() * size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_left_edge_to_neighbour() {
        let moving = Rect::new(105.0, 50.0, 20.0, 20.0);
        let other = Rect::new(0.0, 300.0, 100.0, 10.0);
        let r = snap_rect(moving, &[other], None, 12.0, SnapEdges::ALL);
        assert_eq!(r.dx, -5.0);
        assert_eq!(r.dy, 0.0);
        let g = r.guides.iter().find(|g| g.axis == Axis::X).unwrap();
        assert_eq!(g.position, 100.0);
        assert_eq!((g.start, g.end), (50.0, 310.0));
    }

    #[test]
    fn out_of_threshold_is_ignored() {
        let moving = Rect::new(130.0, 500.0, 20.0, 20.0);
        let other = Rect::new(0.0, 0.0, 100.0, 10.0);
        let r = snap_rect(moving, &[other], None, 12.0, SnapEdges::ALL);
        assert_eq!((r.dx, r.dy), (0.0, 0.0));
        assert!(r.guides.is_empty());
    }

    #[test]
    fn canvas_center_is_a_target() {
        let moving = Rect::new(188.0, 0.0, 20.0, 20.0);
        let canvas = Rect::new(0.0, 0.0, 400.0, 300.0);
        let r = snap_rect(moving, &[], Some(canvas), 12.0, SnapEdges::ALL);
        // center 198 -> 200
        assert_eq!(r.dx, 2.0);
        assert!(r.has_guide(Axis::X));
    }

    #[test]
    fn equidistant_candidates_keep_first() {
        let moving = Rect::new(50.0, 0.0, 10.0, 10.0);
        let a = Rect::new(45.0, 100.0, 0.0, 0.0);
        let b = Rect::new(55.0, 200.0, 10.0, 10.0);
        let r = snap_rect(moving, &[a, b], None, 6.0, SnapEdges { x: [true, false, false], y: [false; 3] });
        assert_eq!(r.dx, -5.0);
    }

    #[test]
    fn grid_rounding() {
        assert_eq!(snap_to_grid(29.0, 20.0), 20.0);
        assert_eq!(snap_to_grid(31.0, 20.0), 40.0);
        assert_eq!(snap_to_grid(31.0, 0.0), 31.0);
    }
}
