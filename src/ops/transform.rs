// ============================================================================
// IMAGE TRANSFORMS: crop, quarter turns, flips, resize, perspective warp
// ============================================================================

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::geometry::{Homography, Point, Rect, apply_homography, invert_3x3, solve_perspective_transform};

/// Interpolation method for resize operations.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Bilinear => "bilinear",
            Interpolation::Bicubic => "bicubic",
            Interpolation::Lanczos3 => "lanczos3",
        }
    }

    pub fn from_name(name: &str) -> Option<Interpolation> {
        [Interpolation::Nearest, Interpolation::Bilinear, Interpolation::Bicubic, Interpolation::Lanczos3]
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
    }

    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Bicubic => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

// ---------------------------------------------------------------------------
//  Whole-image geometry
// ---------------------------------------------------------------------------

/// Rotate clockwise by `turns` quarter turns (any integer, wraps).
pub fn rotate_quarter_turns(img: &RgbaImage, turns: i32) -> RgbaImage {
    match turns.rem_euclid(4) {
        1 => imageops::rotate90(img),
        2 => imageops::rotate180(img),
        3 => imageops::rotate270(img),
        _ => img.clone(),
    }
}

pub fn flip(img: &RgbaImage, horizontal: bool, vertical: bool) -> RgbaImage {
    let mut out = img.clone();
    if horizontal {
        imageops::flip_horizontal_in_place(&mut out);
    }
    if vertical {
        imageops::flip_vertical_in_place(&mut out);
    }
    out
}

/// Crop to `rect` (pixel units, clamped to the image).  `None` when the
/// clamped rectangle is empty.
pub fn crop(img: &RgbaImage, rect: Rect) -> Option<RgbaImage> {
    let (w, h) = img.dimensions();
    let x0 = rect.x.round().clamp(0.0, w as f32) as u32;
    let y0 = rect.y.round().clamp(0.0, h as f32) as u32;
    let x1 = rect.right().round().clamp(0.0, w as f32) as u32;
    let y1 = rect.bottom().round().clamp(0.0, h as f32) as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Resize to exactly `w`×`h`.  Same-size requests return a copy.
pub fn resize(img: &RgbaImage, w: u32, h: u32, interp: Interpolation) -> RgbaImage {
    if img.dimensions() == (w, h) || w == 0 || h == 0 {
        return img.clone();
    }
    imageops::resize(img, w, h, interp.to_filter())
}

/// Uniform resize so the longer edge is at most `max_edge`.  Returns the
/// image and the applied scale (1.0 when already small enough).
pub fn fit_within(img: &RgbaImage, max_edge: u32, interp: Interpolation) -> (RgbaImage, f32) {
    let longest = img.width().max(img.height());
    if longest <= max_edge || longest == 0 {
        return (img.clone(), 1.0);
    }
    let scale = max_edge as f32 / longest as f32;
    let w = ((img.width() as f32 * scale).round() as u32).max(1);
    let h = ((img.height() as f32 * scale).round() as u32).max(1);
    (resize(img, w, h, interp), scale)
}

// ---------------------------------------------------------------------------
//  Perspective
// ---------------------------------------------------------------------------

/// Bilinear interpolation at continuous pixel coordinates (integer = pixel
/// center).  Samples outside the image are transparent.
pub fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= img.width() as i32 || sy >= img.height() as i32 {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Warp `src` into a `dst_w`×`dst_h` image where `h` maps source points to
/// destination points.  Each destination pixel center is inverse-mapped.
pub fn warp_perspective(src: &RgbaImage, dst_w: u32, dst_h: u32, h: &Homography) -> Option<RgbaImage> {
    let inv = invert_3x3(h)?;
    Some(warp_with_inverse(src, dst_w, dst_h, &inv))
}

fn warp_with_inverse(src: &RgbaImage, dst_w: u32, dst_h: u32, inv: &Homography) -> RgbaImage {
    let mut dst = RgbaImage::new(dst_w, dst_h);
    let row_bytes = dst_w as usize * 4;
    dst.par_chunks_mut(row_bytes).enumerate().for_each(|(dy, row)| {
        for dx in 0..dst_w as usize {
            let p = Point::new(dx as f32 + 0.5, dy as f32 + 0.5);
            let Some(s) = apply_homography(inv, p) else { continue };
            let px = bilinear_sample(src, s.x - 0.5, s.y - 0.5);
            row[dx * 4..dx * 4 + 4].copy_from_slice(&px.0);
        }
    });
    dst
}

/// Straighten the quadrilateral `quad` (TL, TR, BR, BL in source pixels)
/// into an upright rectangle.  Output size is the mean of opposite edge
/// lengths.
pub fn perspective_crop(src: &RgbaImage, quad: &[Point; 4]) -> Option<RgbaImage> {
    let top = quad[0].distance(quad[1]);
    let bottom = quad[3].distance(quad[2]);
    let left = quad[0].distance(quad[3]);
    let right = quad[1].distance(quad[2]);
    let w = ((top + bottom) * 0.5).round() as u32;
    let h = ((left + right) * 0.5).round() as u32;
    if w == 0 || h == 0 {
        return None;
    }
    let dst_rect = Rect::new(0.0, 0.0, w as f32, h as f32).corners();
    // Solve destination -> source directly; that is the inverse map.
    let inv = solve_perspective_transform(&dst_rect, quad)?;
    Some(warp_with_inverse(src, w, h, &inv))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 0, 255]))
    }

    #[test]
    fn quarter_turns_wrap() {
        let img = gradient(4, 2);
        assert_eq!(rotate_quarter_turns(&img, 1).dimensions(), (2, 4));
        assert_eq!(rotate_quarter_turns(&img, 4), img);
        assert_eq!(rotate_quarter_turns(&img, -1), rotate_quarter_turns(&img, 3));
    }

    #[test]
    fn crop_clamps_to_image() {
        let img = gradient(10, 10);
        let out = crop(&img, Rect::new(5.0, 5.0, 20.0, 20.0)).unwrap();
        assert_eq!(out.dimensions(), (5, 5));
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(5, 5));
        assert!(crop(&img, Rect::new(12.0, 0.0, 3.0, 3.0)).is_none());
    }

    #[test]
    fn axis_aligned_quad_is_a_plain_crop() {
        let img = gradient(20, 20);
        let quad = Rect::new(4.0, 6.0, 8.0, 5.0).corners();
        let out = perspective_crop(&img, &quad).unwrap();
        assert_eq!(out.dimensions(), (8, 5));
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(4, 6));
        assert_eq!(out.get_pixel(7, 4), img.get_pixel(11, 10));
    }

    #[test]
    fn fit_within_limits_long_edge() {
        let img = gradient(40, 20);
        let (out, scale) = fit_within(&img, 10, Interpolation::Bilinear);
        assert_eq!(out.dimensions(), (10, 5));
        assert_eq!(scale, 0.25);
    }
}
