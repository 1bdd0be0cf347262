use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use crate::selection::mix_pixel;

// ============================================================================
// GAUSSIAN BLUR
// ============================================================================

/// Normalized 1D Gaussian kernel of radius `ceil(3σ)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(0.0) as usize;
    if radius == 0 || sigma <= 0.0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let inv = 1.0 / kernel.iter().sum::<f32>();
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Separable blur over an interleaved 8-bit buffer with `channels` samples
/// per pixel.  Rows run in parallel; edges clamp.
fn blur_interleaved(src: &[u8], w: usize, h: usize, channels: usize, sigma: f32) -> Vec<u8> {
    if w == 0 || h == 0 || sigma <= 0.0 {
        return src.to_vec();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let stride = w * channels;

    let buf_in: Vec<f32> = src.iter().map(|&b| b as f32).collect();

    let mut buf_h = vec![0.0f32; stride * h];
    buf_h.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &buf_in[y * stride..(y + 1) * stride];
        for x in 0..w {
            for c in 0..channels {
                let mut acc = 0.0f32;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let sx = (x as isize + ki as isize - radius).clamp(0, w as isize - 1) as usize;
                    acc += row_in[sx * channels + c] * kv;
                }
                row_out[x * channels + c] = acc;
            }
        }
    });

    let mut out = vec![0u8; stride * h];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            for c in 0..channels {
                let mut acc = 0.0f32;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let sy = (y as isize + ki as isize - radius).clamp(0, h as isize - 1) as usize;
                    acc += buf_h[sy * stride + x * channels + c] * kv;
                }
                row_out[x * channels + c] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

/// Gaussian blur of all four channels.
pub fn gaussian_blur(src: &RgbaImage, sigma: f32) -> RgbaImage {
    let (w, h) = src.dimensions();
    let raw = blur_interleaved(src.as_raw(), w as usize, h as usize, 4, sigma);
    RgbaImage::from_raw(w, h, raw).unwrap_or_else(|| src.clone())
}

/// Gaussian blur of a single-channel mask (selection feathering).
pub fn blur_mask(mask: &GrayImage, sigma: f32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let raw = blur_interleaved(mask.as_raw(), w as usize, h as usize, 1, sigma);
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| mask.clone())
}

/// Bounding box `(x0, y0, x1, y1)` (exclusive max) of non-zero mask pixels.
pub fn mask_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = mask.dimensions();
    let (mut x0, mut y0, mut x1, mut y1) = (w, h, 0u32, 0u32);
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 0 {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x + 1);
            y1 = y1.max(y + 1);
        }
    }
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

/// Blur post-pass: blurred inside the mask, untouched outside, blended by
/// mask alpha at the feathered boundary.  Without a mask the whole image is
/// blurred.
///
/// Only the mask's bounding box (padded by the kernel radius so edge samples
/// still see real neighbours) is blurred.
pub fn blur_through_mask(src: &RgbaImage, sigma: f32, mask: Option<&GrayImage>) -> RgbaImage {
    if sigma <= 0.0 {
        return src.clone();
    }
    let Some(mask) = mask else {
        return gaussian_blur(src, sigma);
    };
    let (w, h) = src.dimensions();
    if mask.dimensions() != (w, h) {
        crate::log_warn!(
            "blur mask {:?} does not match image {}x{}; blurring globally",
            mask.dimensions(),
            w,
            h
        );
        return gaussian_blur(src, sigma);
    }
    let Some((bx0, by0, bx1, by1)) = mask_bounds(mask) else {
        return src.clone();
    };

    let pad = (sigma * 3.0).ceil() as u32;
    let cx0 = bx0.saturating_sub(pad);
    let cy0 = by0.saturating_sub(pad);
    let cx1 = (bx1 + pad).min(w);
    let cy1 = (by1 + pad).min(h);

    let crop = image::imageops::crop_imm(src, cx0, cy0, cx1 - cx0, cy1 - cy0).to_image();
    let blurred = gaussian_blur(&crop, sigma);

    let mut out = src.clone();
    let stride = w as usize * 4;
    let mask_raw = mask.as_raw();
    out.par_chunks_mut(stride)
        .enumerate()
        .skip(by0 as usize)
        .take((by1 - by0) as usize)
        .for_each(|(y, row)| {
            for x in bx0 as usize..bx1 as usize {
                let a = mask_raw[y * w as usize + x];
                if a == 0 {
                    continue;
                }
                let bp = blurred.get_pixel(x as u32 - cx0, y as u32 - cy0).0;
                let pi = x * 4;
                let orig = [row[pi], row[pi + 1], row[pi + 2], row[pi + 3]];
                row[pi..pi + 4].copy_from_slice(&mix_pixel(orig, bp, a));
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn kernel_is_normalized() {
        let k = gaussian_kernel(2.5);
        assert_eq!(k.len(), 2 * 8 + 1);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flat_image_is_unchanged_by_blur() {
        let img = RgbaImage::from_pixel(12, 9, Rgba([40, 80, 120, 255]));
        assert_eq!(gaussian_blur(&img, 3.0), img);
    }

    #[test]
    fn masked_blur_leaves_outside_untouched() {
        let mut img = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        for y in 0..20 {
            for x in 10..20 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let mut mask = GrayImage::new(20, 20);
        for y in 0..10 {
            for x in 0..20 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let out = blur_through_mask(&img, 2.0, Some(&mask));
        // Bottom half is outside the mask.
        assert_eq!(out.get_pixel(9, 15), img.get_pixel(9, 15));
        // Top half at the edge is softened.
        let p = out.get_pixel(9, 5)[0];
        assert!(p > 0 && p < 255);
    }
}
