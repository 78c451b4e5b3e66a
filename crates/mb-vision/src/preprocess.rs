//! Pixel transforms. Every function borrows its input and returns a new
//! buffer, so one frame can be shared read-only between strategies.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

pub const CONTRAST_RANGE: (f64, f64) = (1.0, 2.0);
pub const SHARPEN_RANGE: (f64, f64) = (0.0, 1.0);
pub const BRIGHTNESS_RANGE: (f64, f64) = (-50.0, 50.0);

/// Channels with a smaller spread than this are left alone by scene normalization
pub const SCENE_NORMALIZE_MIN_RANGE: u8 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub contrast_factor: f64,
    pub normalize_colors: bool,
    pub sharpening_factor: f64,
    pub reduce_noise: bool,
    pub brightness_adjust: f64,
}

impl Default for PreprocessConfig {
    /// Identity transform
    fn default() -> Self {
        Self {
            contrast_factor: 1.0,
            normalize_colors: false,
            sharpening_factor: 0.0,
            reduce_noise: false,
            brightness_adjust: 0.0,
        }
    }
}

impl PreprocessConfig {
    pub fn clamped(mut self) -> Self {
        self.contrast_factor = self.contrast_factor.clamp(CONTRAST_RANGE.0, CONTRAST_RANGE.1);
        self.sharpening_factor = self.sharpening_factor.clamp(SHARPEN_RANGE.0, SHARPEN_RANGE.1);
        self.brightness_adjust = self
            .brightness_adjust
            .clamp(BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.brightness_adjust.round() == 0.0
            && (self.contrast_factor - 1.0).abs() < 1e-9
            && !self.reduce_noise
            && !self.normalize_colors
            && self.sharpening_factor <= 0.0
    }
}

/// Brightness shift → contrast → box blur → colour normalization → unsharp mask
pub fn apply(img: &RgbaImage, config: &PreprocessConfig) -> RgbaImage {
    let mut out = img.clone();
    let delta = config.brightness_adjust.round() as i32;
    if delta != 0 {
        out = adjust_brightness(&out, delta);
    }
    if (config.contrast_factor - 1.0).abs() > 1e-9 {
        out = enhance_contrast(&out, config.contrast_factor);
    }
    if config.reduce_noise {
        out = box_blur(&out);
    }
    if config.normalize_colors {
        out = normalize_colors(&out, SCENE_NORMALIZE_MIN_RANGE);
    }
    if config.sharpening_factor > 0.0 {
        out = sharpen(&out, config.sharpening_factor);
    }
    out
}

fn map_rgb(img: &RgbaImage, lut: &[u8; 256]) -> RgbaImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] = lut[px[c] as usize];
        }
    }
    out
}

fn lut(f: impl Fn(f64) -> f64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = f(i as f64).round().clamp(0.0, 255.0) as u8;
    }
    table
}

pub fn adjust_brightness(img: &RgbaImage, delta: i32) -> RgbaImage {
    map_rgb(img, &lut(|v| v + delta as f64))
}

/// Stretch around mid-gray
pub fn enhance_contrast(img: &RgbaImage, factor: f64) -> RgbaImage {
    map_rgb(img, &lut(|v| (v - 128.0) * factor + 128.0))
}

/// 3×3 mean filter on RGB; edge pixels average their in-bounds neighbours.
pub fn box_blur(img: &RgbaImage) -> RgbaImage {
    let (w, h) = img.dimensions();
    let mut out = img.clone();
    for y in 0..h {
        for x in 0..w {
            let mut sum = [0u32; 3];
            let mut count = 0u32;
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let p = img.get_pixel(nx, ny);
                    for c in 0..3 {
                        sum[c] += p[c] as u32;
                    }
                    count += 1;
                }
            }
            let px = out.get_pixel_mut(x, y);
            for c in 0..3 {
                px[c] = ((sum[c] + count / 2) / count) as u8;
            }
        }
    }
    out
}

/// Per-channel min/max stretch to the full 0..=255 range. Channels whose
/// spread is below `min_range` pass through unchanged.
pub fn normalize_colors(img: &RgbaImage, min_range: u8) -> RgbaImage {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for px in img.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(px[c]);
            hi[c] = hi[c].max(px[c]);
        }
    }

    let tables: Vec<Option<[u8; 256]>> = (0..3)
        .map(|c| {
            let range = hi[c].saturating_sub(lo[c]);
            if range == 0 || range < min_range {
                return None;
            }
            let (min, range) = (lo[c] as f64, range as f64);
            Some(lut(|v| (v - min) * 255.0 / range))
        })
        .collect();

    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            if let Some(table) = &tables[c] {
                px[c] = table[px[c] as usize];
            }
        }
    }
    out
}

/// Unsharp mask: add back `amount` times the difference from a blurred copy.
pub fn sharpen(img: &RgbaImage, amount: f64) -> RgbaImage {
    let blurred = box_blur(img);
    let mut out = img.clone();
    for (px, b) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let v = px[c] as f64;
            px[c] = (v + amount * (v - b[c] as f64)).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32, lo: u8, hi: u8) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            let span = (hi - lo) as u32;
            let v = lo + ((x * 7 + y * 13) % (span + 1)) as u8;
            Rgba([v, hi - (v - lo), v / 2 + lo / 2, 200])
        })
    }

    #[test]
    fn test_brightness_roundtrip_inside_safe_range() {
        let img = gradient(17, 9, 20, 235);
        let back = adjust_brightness(&adjust_brightness(&img, 20), -20);
        assert_eq!(back, img);
    }

    #[test]
    fn test_brightness_clamps() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([250, 5, 128, 255]));
        let out = adjust_brightness(&img, 20);
        assert_eq!(out.get_pixel(0, 0).0, [255, 25, 148, 255]);
    }

    #[test]
    fn test_transforms_leave_source_untouched() {
        let img = gradient(8, 8, 10, 200);
        let copy = img.clone();
        let _ = apply(
            &img,
            &PreprocessConfig {
                contrast_factor: 1.5,
                normalize_colors: true,
                sharpening_factor: 0.4,
                reduce_noise: true,
                brightness_adjust: 10.0,
            },
        );
        assert_eq!(img, copy);
    }

    #[test]
    fn test_contrast_pivots_on_mid_gray() {
        let img = RgbaImage::from_fn(3, 1, |x, _| {
            let v = [100u8, 128, 160][x as usize];
            Rgba([v, v, v, 255])
        });
        let out = enhance_contrast(&img, 1.5);
        assert_eq!(out.get_pixel(0, 0)[0], 86);
        assert_eq!(out.get_pixel(1, 0)[0], 128);
        assert_eq!(out.get_pixel(2, 0)[0], 176);
    }

    #[test]
    fn test_normalize_respects_min_range() {
        // red spans 50..=100, green spans 10 values, blue is flat
        let img = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([50, 100, 7, 255])
            } else {
                Rgba([100, 110, 7, 255])
            }
        });
        let out = normalize_colors(&img, 20);
        assert_eq!(out.get_pixel(0, 0).0, [0, 100, 7, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [255, 110, 7, 255]);

        let full = normalize_colors(&img, 1);
        assert_eq!(full.get_pixel(1, 0)[1], 255);
    }

    #[test]
    fn test_blur_of_flat_image_is_flat() {
        let img = RgbaImage::from_pixel(5, 4, Rgba([90, 40, 10, 255]));
        assert_eq!(box_blur(&img), img);
        assert_eq!(sharpen(&img, 1.0), img);
    }

    #[test]
    fn test_clamped_config() {
        let cfg = PreprocessConfig {
            contrast_factor: 3.0,
            sharpening_factor: -1.0,
            brightness_adjust: 80.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(cfg.contrast_factor, 2.0);
        assert_eq!(cfg.sharpening_factor, 0.0);
        assert_eq!(cfg.brightness_adjust, 50.0);
        assert!(PreprocessConfig::default().is_identity());
    }
}
