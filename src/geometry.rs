//! Geometry kernel: points, rectangles, rotated bounds, 2D affine and
//! planar perspective transforms, bezier flattening.  No state.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

// ============================================================================
// POINT / RECT
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Rotate `self` about `center` by `degrees` (clockwise on a y-down canvas).
    pub fn rotate_about(self, center: Point, degrees: f32) -> Point {
        if degrees == 0.0 {
            return self;
        }
        let (s, c) = degrees.to_radians().sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Point::new(center.x + dx * c - dy * s, center.y + dx * s + dy * c)
    }

    /// Reflect `self` through `anchor`.
    pub fn mirrored_through(self, anchor: Point) -> Point {
        Point::new(2.0 * anchor.x - self.x, 2.0 * anchor.y - self.y)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned rectangle, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Normalized rectangle spanning two arbitrary corners.
    pub fn from_points(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self::new(x, y, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Hit test against this rect rotated by `degrees` about its center.
    pub fn contains_rotated(&self, p: Point, degrees: f32) -> bool {
        self.contains(p.rotate_about(self.center(), -degrees))
    }

    /// Overlap test; touching edges count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }
}

/// Corners of `rect` rotated about its own center.
pub fn rotated_corners(rect: &Rect, degrees: f32) -> [Point; 4] {
    let center = rect.center();
    rect.corners().map(|p| p.rotate_about(center, degrees))
}

/// Axis-aligned box enclosing every `(rect, rotation)` after rotating each
/// rect about its own center.  `None` for empty input.
pub fn rotated_bounding_box<I>(items: I) -> Option<Rect>
where
    I: IntoIterator<Item = (Rect, f32)>,
{
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    let mut any = false;

    for (rect, rotation) in items {
        any = true;
        for p in rotated_corners(&rect, rotation) {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
    }

    any.then(|| Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Horizontal (`X`) or vertical (`Y`) direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

// ============================================================================
// AFFINE
// ============================================================================

/// 2D affine transform in canvas order: `x' = a*x + c*y + e`,
/// `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn translation(dx: f32, dy: f32) -> Self {
        Affine { e: dx, f: dy, ..Self::IDENTITY }
    }

    pub fn rotation(radians: f32) -> Self {
        let (s, c) = radians.sin_cos();
        Affine { a: c, b: s, c: -s, d: c, e: 0.0, f: 0.0 }
    }

    pub fn scaling(sx: f32, sy: f32) -> Self {
        Affine { a: sx, d: sy, ..Self::IDENTITY }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn then_apply(&self, other: &Affine) -> Affine {
        Affine {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Average linear scale; used to pick raster resolution for glyphs.
    pub fn scale_factor(&self) -> f32 {
        self.determinant().abs().sqrt()
    }

    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

// ============================================================================
// PERSPECTIVE
// ============================================================================

/// Row-major 3×3 planar homography.
pub type Homography = [[f64; 3]; 3];

/// Solve the homography mapping each `src[i]` onto `dst[i]`.
/// Returns `None` when the correspondences are degenerate (collinear or
/// repeated points).
pub fn solve_perspective_transform(src: &[Point; 4], dst: &[Point; 4]) -> Option<Homography> {
    let mut a = [[0.0f64; 9]; 8];
    for i in 0..4 {
        let (x, y) = (src[i].x as f64, src[i].y as f64);
        let (u, v) = (dst[i].x as f64, dst[i].y as f64);
        a[i * 2] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        a[i * 2 + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }

    let scale = a
        .iter()
        .flat_map(|row| row[..8].iter())
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(1.0);
    let eps = 1e-10 * scale;

    // Gaussian elimination with partial pivoting on the augmented matrix.
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < eps {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let h: Vec<f64> = (0..8).map(|i| a[i][8] / a[i][i]).collect();
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some([[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]])
}

/// Map a point through a homography; `None` at the line at infinity.
pub fn apply_homography(m: &Homography, p: Point) -> Option<Point> {
    let (x, y) = (p.x as f64, p.y as f64);
    let w = m[2][0] * x + m[2][1] * y + m[2][2];
    if w.abs() < 1e-12 {
        return None;
    }
    Some(Point::new(
        ((m[0][0] * x + m[0][1] * y + m[0][2]) / w) as f32,
        ((m[1][0] * x + m[1][1] * y + m[1][2]) / w) as f32,
    ))
}

/// Invert a 3×3 matrix; `None` when singular.
pub fn invert_3x3(m: &Homography) -> Option<Homography> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
        ],
    ])
}

// ============================================================================
// BEZIER
// ============================================================================

/// Flatten a cubic bezier into a polyline including both endpoints.
/// The step count follows the control polygon length (about one segment per
/// 4 px, capped at 64).
pub fn flatten_cubic_bezier(p0: Point, p1: Point, p2: Point, p3: Point) -> Vec<Point> {
    let hull = p0.distance(p1) + p1.distance(p2) + p2.distance(p3);
    let steps = ((hull / 4.0).ceil() as usize).clamp(1, 64);

    (0..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            let mt = 1.0 - t;
            let w0 = mt * mt * mt;
            let w1 = 3.0 * mt * mt * t;
            let w2 = 3.0 * mt * t * t;
            let w3 = t * t * t;
            Point::new(
                w0 * p0.x + w1 * p1.x + w2 * p2.x + w3 * p3.x,
                w0 * p0.y + w1 * p1.y + w2 * p2.y + w3 * p3.y,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn bounding_box_of_nothing_is_none() {
        assert!(rotated_bounding_box(std::iter::empty()).is_none());
    }

    #[test]
    fn rotated_45_square_grows() {
        let r = rotated_bounding_box([(Rect::new(0.0, 0.0, 10.0, 10.0), 45.0)]).unwrap();
        let diag = 10.0 * std::f32::consts::SQRT_2;
        assert!(close(r.width, diag));
        assert!(close(r.center().x, 5.0));
    }

    #[test]
    fn identity_homography_for_same_quad() {
        let q = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let h = solve_perspective_transform(&q, &q).unwrap();
        let p = apply_homography(&h, Point::new(3.0, 7.0)).unwrap();
        assert!(close(p.x, 3.0) && close(p.y, 7.0));
    }

    #[test]
    fn homography_maps_corners() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        let dst = [
            Point::new(10.0, 5.0),
            Point::new(90.0, 20.0),
            Point::new(80.0, 95.0),
            Point::new(5.0, 70.0),
        ];
        let h = solve_perspective_transform(&src, &dst).unwrap();
        for i in 0..4 {
            let p = apply_homography(&h, src[i]).unwrap();
            assert!(close(p.x, dst[i].x) && close(p.y, dst[i].y), "corner {i}");
        }
        let inv = invert_3x3(&h).unwrap();
        let back = apply_homography(&inv, dst[2]).unwrap();
        assert!(close(back.x, 100.0) && close(back.y, 100.0));
    }

    #[test]
    fn collinear_quad_is_rejected() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(solve_perspective_transform(&src, &dst).is_none());
    }

    #[test]
    fn bezier_hits_endpoints() {
        let pts = flatten_cubic_bezier(
            Point::new(0.0, 0.0),
            Point::new(0.0, 50.0),
            Point::new(50.0, 50.0),
            Point::new(50.0, 0.0),
        );
        assert!(pts.len() > 4);
        assert_eq!(pts[0], Point::new(0.0, 0.0));
        let last = pts[pts.len() - 1];
        assert!(close(last.x, 50.0) && close(last.y, 0.0));
    }

    #[test]
    fn affine_inverse_round_trips() {
        let t = Affine::translation(5.0, -3.0)
            .then_apply(&Affine::rotation(0.7))
            .then_apply(&Affine::scaling(2.0, 3.0));
        let inv = t.inverse().unwrap();
        let p = inv.apply(t.apply(Point::new(4.0, 9.0)));
        assert!(close(p.x, 4.0) && close(p.y, 9.0));
    }
}
