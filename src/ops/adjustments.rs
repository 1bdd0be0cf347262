// ============================================================================
// COLOR ADJUSTMENTS: the per-pixel filter chain of the image editor
// ============================================================================

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::io::EditorError;
use crate::selection::mix_pixel;

/// Named hue channels and their center hue in degrees.
pub const HUE_BANDS: [(&str, f32); 8] = [
    ("red", 0.0),
    ("orange", 30.0),
    ("yellow", 60.0),
    ("green", 120.0),
    ("aqua", 180.0),
    ("blue", 240.0),
    ("purple", 270.0),
    ("magenta", 300.0),
];

/// A band's weight falls linearly to zero this many degrees from its center.
pub const BAND_FALLOFF_DEGREES: f32 = 60.0;

const TEMPERATURE_GAIN: f32 = 1.5;
const TINT_GAIN: f32 = 0.5;
const DEHAZE_SATURATION_GAIN: f32 = 0.3;
const DEHAZE_LIGHTNESS_GAIN: f32 = 0.1;

/// Per-band shift: hue in degrees, saturation/lightness in percentage points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HueBandShift {
    pub hue: f32,
    pub saturation: f32,
    pub lightness: f32,
}

impl HueBandShift {
    pub fn is_zero(&self) -> bool {
        self.hue == 0.0 && self.saturation == 0.0 && self.lightness == 0.0
    }
}

/// Filter parameters.  Everything is resolution independent except `grain`,
/// which is an amplitude in 8-bit levels applied per output pixel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub invert: bool,
    /// -100..100
    pub contrast: f32,
    /// -100..100, positive = warmer
    pub temperature: f32,
    /// -100..100, positive = magenta
    pub tint: f32,
    /// -100..100
    pub vibrance: f32,
    /// degrees
    pub hue: f32,
    pub saturation: f32,
    pub lightness: f32,
    /// -100..100
    pub clarity: f32,
    /// -100..100
    pub dehaze: f32,
    /// Indexed like `HUE_BANDS`.
    pub bands: [HueBandShift; 8],
    /// 0..100
    pub grain: f32,
}

impl Adjustments {
    pub fn is_identity(&self) -> bool {
        *self == Adjustments::default()
    }

    fn needs_hsl(&self) -> bool {
        self.vibrance != 0.0
            || self.hue != 0.0
            || self.saturation != 0.0
            || self.lightness != 0.0
            || self.clarity != 0.0
            || self.dehaze != 0.0
            || self.bands.iter().any(|b| !b.is_zero())
    }

    /// Set one parameter by name, e.g. `contrast=20` or `band.red.hue=-15`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), EditorError> {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "invert" {
            self.invert = matches!(value, "1" | "true" | "yes" | "on");
            return Ok(());
        }
        let v: f32 = value
            .parse()
            .map_err(|_| EditorError::InvalidFormat(format!("{} expects a number, got '{}'", key, value)))?;

        if let Some(rest) = key.strip_prefix("band.") {
            let (band, field) = rest
                .split_once('.')
                .ok_or_else(|| EditorError::InvalidFormat(format!("malformed band key '{}'", key)))?;
            let idx = HUE_BANDS
                .iter()
                .position(|(name, _)| *name == band)
                .ok_or_else(|| EditorError::InvalidFormat(format!("unknown hue band '{}'", band)))?;
            let shift = &mut self.bands[idx];
            match field {
                "hue" => shift.hue = v,
                "saturation" => shift.saturation = v,
                "lightness" => shift.lightness = v,
                _ => return Err(EditorError::InvalidFormat(format!("unknown band field '{}'", field))),
            }
            return Ok(());
        }

        let slot = match key.as_str() {
            "contrast" => &mut self.contrast,
            "temperature" => &mut self.temperature,
            "tint" => &mut self.tint,
            "vibrance" => &mut self.vibrance,
            "hue" => &mut self.hue,
            "saturation" => &mut self.saturation,
            "lightness" => &mut self.lightness,
            "clarity" => &mut self.clarity,
            "dehaze" => &mut self.dehaze,
            "grain" => &mut self.grain,
            _ => return Err(EditorError::InvalidFormat(format!("unknown adjustment '{}'", key))),
        };
        *slot = v;
        Ok(())
    }

    /// Parse a `key=value` pair.
    pub fn set_pair(&mut self, pair: &str) -> Result<(), EditorError> {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| EditorError::InvalidFormat(format!("expected key=value, got '{}'", pair)))?;
        self.set(k, v)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the filter chain over `src`.  With a mask, each output pixel is
/// `original * (1 - a) + filtered * a`; unmasked pixels are copied.
/// `seed` drives the grain noise so preview and export agree.
pub fn apply_adjustments(src: &RgbaImage, adj: &Adjustments, mask: Option<&GrayImage>, seed: u32) -> RgbaImage {
    if adj.is_identity() {
        return src.clone();
    }
    let (w, h) = src.dimensions();
    let mask = match mask {
        Some(m) if m.dimensions() != (w, h) => {
            crate::log_warn!("adjustment mask {:?} does not match {}x{}; ignoring it", m.dimensions(), w, h);
            None
        }
        other => other,
    };

    let stride = w as usize * 4;
    let src_raw = src.as_raw();
    let mask_raw = mask.map(|m| m.as_raw().as_slice());
    let mut out = src.clone();
    let hsl_stage = adj.needs_hsl();

    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let row_in = &src_raw[y * stride..(y + 1) * stride];
        for x in 0..w as usize {
            let a = mask_raw.map_or(255, |m| m[y * w as usize + x]);
            if a == 0 {
                continue;
            }
            let pi = x * 4;
            let orig = [row_in[pi], row_in[pi + 1], row_in[pi + 2], row_in[pi + 3]];
            let filtered = adjust_pixel(orig, adj, hsl_stage, x as u32, y as u32, seed);
            let px = if a == 255 { filtered } else { mix_pixel(orig, filtered, a) };
            row[pi..pi + 4].copy_from_slice(&px);
        }
    });
    out
}

fn adjust_pixel(px: [u8; 4], adj: &Adjustments, hsl_stage: bool, x: u32, y: u32, seed: u32) -> [u8; 4] {
    let mut r = px[0] as f32;
    let mut g = px[1] as f32;
    let mut b = px[2] as f32;

    if adj.invert {
        r = 255.0 - r;
        g = 255.0 - g;
        b = 255.0 - b;
    }

    if adj.contrast != 0.0 {
        let f = (100.0 + adj.contrast.clamp(-100.0, 100.0)) / 100.0;
        r = (r - 127.5) * f + 127.5;
        g = (g - 127.5) * f + 127.5;
        b = (b - 127.5) * f + 127.5;
    }

    r += adj.temperature * TEMPERATURE_GAIN;
    b -= adj.temperature * TEMPERATURE_GAIN;
    g -= adj.tint * TINT_GAIN;

    r = r.clamp(0.0, 255.0);
    g = g.clamp(0.0, 255.0);
    b = b.clamp(0.0, 255.0);

    if hsl_stage {
        let (h, s, l) = rgb_to_hsl(r / 255.0, g / 255.0, b / 255.0);
        let (h, s, l) = adjust_hsl(h * 360.0, s * 100.0, l * 100.0, adj);
        let (nr, ng, nb) = hsl_to_rgb(h / 360.0, s / 100.0, l / 100.0);
        r = nr * 255.0;
        g = ng * 255.0;
        b = nb * 255.0;
    }

    if adj.grain > 0.0 {
        let n = (hash_f32(x, y, seed) - 0.5) * 2.0 * adj.grain;
        r += n;
        g += n;
        b += n;
    }

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
        px[3],
    ]
}

/// HSL stage.  `h` in degrees, `s`/`l` in percent.
fn adjust_hsl(mut h: f32, mut s: f32, mut l: f32, adj: &Adjustments) -> (f32, f32, f32) {
    // Vibrance boosts dull pixels more than already saturated ones.
    if adj.vibrance != 0.0 {
        s = (s + adj.vibrance * (1.0 - s / 100.0)).clamp(0.0, 100.0);
    }

    h = (h + adj.hue).rem_euclid(360.0);
    s = (s + adj.saturation).clamp(0.0, 100.0);
    l = (l + adj.lightness).clamp(0.0, 100.0);

    if adj.clarity != 0.0 {
        l = (l + (l - 50.0) * adj.clarity / 100.0).clamp(0.0, 100.0);
    }

    if adj.dehaze != 0.0 {
        s = (s + adj.dehaze * DEHAZE_SATURATION_GAIN).clamp(0.0, 100.0);
        l = (l - adj.dehaze * DEHAZE_LIGHTNESS_GAIN).clamp(0.0, 100.0);
    }

    let (dh, ds, dl) = band_shift(h, &adj.bands);
    h = (h + dh).rem_euclid(360.0);
    s = (s + ds).clamp(0.0, 100.0);
    l = (l + dl).clamp(0.0, 100.0);

    (h, s, l)
}

/// Summed band shift at hue `h` (degrees).
pub fn band_shift(h: f32, bands: &[HueBandShift; 8]) -> (f32, f32, f32) {
    let mut acc = (0.0, 0.0, 0.0);
    for (shift, (_, center)) in bands.iter().zip(HUE_BANDS.iter()) {
        if shift.is_zero() {
            continue;
        }
        let w = band_weight(h, *center);
        acc.0 += shift.hue * w;
        acc.1 += shift.saturation * w;
        acc.2 += shift.lightness * w;
    }
    acc
}

/// Triangular falloff: 1 at `center`, 0 at `BAND_FALLOFF_DEGREES` away.
pub fn band_weight(h: f32, center: f32) -> f32 {
    let d = (h - center).rem_euclid(360.0);
    let d = d.min(360.0 - d);
    (1.0 - d / BAND_FALLOFF_DEGREES).max(0.0)
}

// ============================================================================
// NOISE
// ============================================================================

#[inline]
fn hash_u32(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x9E3779B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EBCA6B);
    x ^= x >> 13;
    x = x.wrapping_mul(0xC2B2AE35);
    x ^= x >> 16;
    x
}

/// Hash to f32 in [0, 1).
#[inline]
fn hash_f32(x: u32, y: u32, seed: u32) -> f32 {
    let h = hash_u32(
        x.wrapping_mul(374761393)
            .wrapping_add(y.wrapping_mul(668265263))
            .wrapping_add(seed),
    );
    (h & 0x00FFFFFF) as f32 / 16777216.0
}

// ============================================================================
// COLOR SPACE
// ============================================================================

/// RGB (0..1) → HSL (all 0..1)
pub fn rgb_to_hsl(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < 1e-6 {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };

    let h = if (max - r).abs() < 1e-6 {
        let mut h = (g - b) / d;
        if h < 0.0 {
            h += 6.0;
        }
        h / 6.0
    } else if (max - g).abs() < 1e-6 {
        ((b - r) / d + 2.0) / 6.0
    } else {
        ((r - g) / d + 4.0) / 6.0
    };

    (h, s, l)
}

/// HSL (all 0..1) → RGB (0..1)
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s.abs() < 1e-6 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (hue_to_rgb(p, q, h + 1.0 / 3.0), hue_to_rgb(p, q, h), hue_to_rgb(p, q, h - 1.0 / 3.0))
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    fn solid(c: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba(c))
    }

    #[test]
    fn identity_is_a_copy() {
        let img = solid([12, 34, 56, 200]);
        assert_eq!(apply_adjustments(&img, &Adjustments::default(), None, 0), img);
    }

    #[test]
    fn invert_keeps_alpha() {
        let adj = Adjustments { invert: true, ..Adjustments::default() };
        let out = apply_adjustments(&solid([10, 20, 30, 77]), &adj, None, 0);
        assert_eq!(out.get_pixel(0, 0).0, [245, 235, 225, 77]);
    }

    #[test]
    fn contrast_scales_about_midpoint() {
        let adj = Adjustments { contrast: 100.0, ..Adjustments::default() };
        let out = apply_adjustments(&solid([100, 200, 127, 255]), &adj, None, 0);
        // (100-127.5)*2+127.5 = 72.5, (200-127.5)*2+127.5 = 272.5 -> clamp
        assert_eq!(out.get_pixel(0, 0).0, [73, 255, 127, 255]);
    }

    #[test]
    fn band_weights_fall_off() {
        assert_eq!(band_weight(0.0, 0.0), 1.0);
        assert!((band_weight(30.0, 0.0) - 0.5).abs() < 1e-6);
        assert_eq!(band_weight(60.0, 0.0), 0.0);
        assert!((band_weight(350.0, 0.0) - (1.0 - 10.0 / 60.0)).abs() < 1e-5);
    }

    #[test]
    fn red_band_leaves_blue_alone() {
        let mut adj = Adjustments::default();
        adj.set("band.red.saturation", "-100").unwrap();
        let red = apply_adjustments(&solid([255, 0, 0, 255]), &adj, None, 0);
        let p = red.get_pixel(0, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        let blue = solid([0, 0, 255, 255]);
        assert_eq!(apply_adjustments(&blue, &adj, None, 0), blue);
    }

    #[test]
    fn vibrance_protects_saturated_pixels() {
        let adj = Adjustments { vibrance: 50.0, ..Adjustments::default() };
        let (_, s, _) = adjust_hsl(0.0, 100.0, 50.0, &adj);
        assert_eq!(s, 100.0);
        let (_, s, _) = adjust_hsl(0.0, 20.0, 50.0, &adj);
        assert!((s - 60.0).abs() < 1e-4);
    }

    #[test]
    fn mask_limits_effect() {
        let adj = Adjustments { invert: true, ..Adjustments::default() };
        let img = solid([0, 0, 0, 255]);
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([255]));
        let out = apply_adjustments(&img, &adj, Some(&mask), 0);
        assert_eq!(out.get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(2, 2).0, [0, 0, 0, 255]);
    }

    #[test]
    fn grain_is_seeded() {
        let adj = Adjustments { grain: 40.0, ..Adjustments::default() };
        let img = solid([128, 128, 128, 255]);
        let a = apply_adjustments(&img, &adj, None, 7);
        assert_eq!(a, apply_adjustments(&img, &adj, None, 7));
        assert_ne!(a, apply_adjustments(&img, &adj, None, 8));
        let p = a.get_pixel(3, 2).0;
        assert!(p[0] == p[1] && p[1] == p[2]);
    }

    #[test]
    fn parses_pairs() {
        let mut adj = Adjustments::default();
        adj.set_pair("hue=30").unwrap();
        adj.set_pair("band.blue.lightness = 5").unwrap();
        assert_eq!(adj.hue, 30.0);
        assert_eq!(adj.bands[5].lightness, 5.0);
        assert!(adj.set_pair("bogus=1").is_err());
        assert!(adj.set_pair("hue").is_err());
    }
}
