//! Signed distance functions for the shape primitives.  Negative inside,
//! positive outside, in the shape's local units with the origin at its
//! center.

/// SDF for an axis-aligned box with half-extents `(hx, hy)`.
#[inline]
pub fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for a rounded box; the radius is clamped to the shorter half-extent.
#[inline]
pub fn sdf_rounded_box(px: f32, py: f32, hx: f32, hy: f32, r: f32) -> f32 {
    let r = r.max(0.0).min(hx).min(hy);
    sdf_box(px, py, hx - r, hy - r) - r
}

/// SDF for an ellipse (first-order approximation, exact on the axes).
#[inline]
pub fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    if rx <= 0.0 || ry <= 0.0 {
        return f32::INFINITY;
    }
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// Distance to the segment `a-b`.
#[inline]
pub fn sdf_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let (pax, pay) = (px - ax, py - ay);
    let (bax, bay) = (bx - ax, by - ay);
    let len2 = bax * bax + bay * bay;
    let h = if len2 > 0.0 { ((pax * bax + pay * bay) / len2).clamp(0.0, 1.0) } else { 0.0 };
    let (dx, dy) = (pax - bax * h, pay - bay * h);
    (dx * dx + dy * dy).sqrt()
}

/// Anti-aliased coverage for a signed distance measured in device pixels:
/// a one-pixel ramp centered on the edge.
#[inline]
pub fn coverage(device_distance: f32) -> f32 {
    smoothstep(0.5, -0.5, device_distance)
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_edges() {
        assert_eq!(sdf_box(0.0, 0.0, 5.0, 3.0), -3.0);
        assert_eq!(sdf_box(7.0, 0.0, 5.0, 3.0), 2.0);
    }

    #[test]
    fn rounded_corner_is_cut() {
        assert!(sdf_box(4.9, 2.9, 5.0, 3.0) < 0.0);
        assert!(sdf_rounded_box(4.9, 2.9, 5.0, 3.0, 2.0) > 0.0);
    }

    #[test]
    fn ellipse_axes_are_exact() {
        assert!((sdf_ellipse(10.0, 0.0, 10.0, 4.0)).abs() < 1e-5);
        assert!((sdf_ellipse(0.0, 6.0, 10.0, 4.0) - 2.0).abs() < 1e-4);
    }

    #[test]
    fn coverage_ramp() {
        assert_eq!(coverage(-0.5), 1.0);
        assert_eq!(coverage(0.5), 0.0);
        assert!((coverage(0.0) - 0.5).abs() < 1e-6);
    }
}
