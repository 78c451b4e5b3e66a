use crate::preprocess::PreprocessConfig;
use image::RgbaImage;
use mb_data::saturation;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessLevel {
    Dark,
    #[default]
    Normal,
    Bright,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContrastLevel {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Coarse guess at the map biome, from colour balance and brightness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentHint {
    #[default]
    Normal,
    Hell,
    Snow,
    Dark,
    Bright,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    pub brightness: f64,
    pub brightness_level: BrightnessLevel,
    pub contrast: f64,
    pub contrast_level: ContrastLevel,
    /// Brightness-normalized local deviation
    pub noise: f64,
    pub noise_level: NoiseLevel,
    pub avg_saturation: f64,
    pub heavy_effects: bool,
    pub environment: EnvironmentHint,
}

impl Default for SceneAnalysis {
    /// Neutral analysis used for empty input
    fn default() -> Self {
        Self {
            brightness: 128.0,
            brightness_level: BrightnessLevel::Normal,
            contrast: 50.0,
            contrast_level: ContrastLevel::Normal,
            noise: 0.0,
            noise_level: NoiseLevel::Low,
            avg_saturation: 0.0,
            heavy_effects: false,
            environment: EnvironmentHint::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneThresholds {
    pub dark_below: f64,
    pub bright_above: f64,
    pub low_contrast_below: f64,
    pub high_contrast_above: f64,
    pub noise_medium: f64,
    pub noise_high: f64,
    /// Fraction of bright, saturated samples that marks heavy effects
    pub effect_fraction: f64,
    pub effect_brightness: f64,
    pub effect_saturation: f64,
    /// Roughly how many pixels to sample on large inputs
    pub sample_budget: u32,
}

impl Default for SceneThresholds {
    fn default() -> Self {
        Self {
            dark_below: 70.0,
            bright_above: 180.0,
            low_contrast_below: 30.0,
            high_contrast_above: 70.0,
            noise_medium: 6.0,
            noise_high: 15.0,
            effect_fraction: 0.05,
            effect_brightness: 200.0,
            effect_saturation: 0.6,
            sample_budget: 65_536,
        }
    }
}

fn pixel_brightness(p: &image::Rgba<u8>) -> f64 {
    (p[0] as f64 + p[1] as f64 + p[2] as f64) / 3.0
}

pub fn analyze(img: &RgbaImage) -> SceneAnalysis {
    analyze_with(img, &SceneThresholds::default())
}

pub fn analyze_with(img: &RgbaImage, t: &SceneThresholds) -> SceneAnalysis {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return SceneAnalysis::default();
    }

    let step = ((w as f64 * h as f64) / t.sample_budget.max(1) as f64)
        .sqrt()
        .ceil()
        .max(1.0) as u32;

    let mut n = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut channel_sum = [0.0f64; 3];
    let mut sat_sum = 0.0;
    let mut effect_hits = 0u32;

    for y in (0..h).step_by(step as usize) {
        for x in (0..w).step_by(step as usize) {
            let p = img.get_pixel(x, y);
            let b = pixel_brightness(p);
            let s = saturation([p[0], p[1], p[2]]);
            n += 1.0;
            sum += b;
            sum_sq += b * b;
            sat_sum += s;
            for c in 0..3 {
                channel_sum[c] += p[c] as f64;
            }
            if b > t.effect_brightness && s > t.effect_saturation {
                effect_hits += 1;
            }
        }
    }

    let brightness = sum / n;
    let contrast = (sum_sq / n - brightness * brightness).max(0.0).sqrt();
    let avg_saturation = sat_sum / n;
    let heavy_effects = effect_hits as f64 / n > t.effect_fraction;
    let mean_rgb = channel_sum.map(|c| c / n);

    let noise = estimate_noise(img, step.max(2), brightness);

    let brightness_level = if brightness < t.dark_below {
        BrightnessLevel::Dark
    } else if brightness > t.bright_above {
        BrightnessLevel::Bright
    } else {
        BrightnessLevel::Normal
    };
    let contrast_level = if contrast < t.low_contrast_below {
        ContrastLevel::Low
    } else if contrast > t.high_contrast_above {
        ContrastLevel::High
    } else {
        ContrastLevel::Normal
    };
    let noise_level = if noise >= t.noise_high {
        NoiseLevel::High
    } else if noise >= t.noise_medium {
        NoiseLevel::Medium
    } else {
        NoiseLevel::Low
    };
    let environment = environment_hint(mean_rgb, brightness, avg_saturation);

    let analysis = SceneAnalysis {
        brightness,
        brightness_level,
        contrast,
        contrast_level,
        noise,
        noise_level,
        avg_saturation,
        heavy_effects,
        environment,
    };
    debug!(
        "Scene: brightness {:.1} ({:?}), contrast {:.1} ({:?}), noise {:.1} ({:?}), sat {:.2}, effects {}, env {:?}",
        brightness,
        brightness_level,
        contrast,
        contrast_level,
        noise,
        noise_level,
        avg_saturation,
        heavy_effects,
        environment
    );
    analysis
}

/// Mean standard deviation of 2×2 neighbourhoods sampled every `stride`
/// pixels, scaled up for dark frames where the same noise has less amplitude.
fn estimate_noise(img: &RgbaImage, stride: u32, brightness: f64) -> f64 {
    let (w, h) = img.dimensions();
    if w < 2 || h < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut blocks = 0u32;
    for y in (0..h - 1).step_by(stride as usize) {
        for x in (0..w - 1).step_by(stride as usize) {
            let v = [
                pixel_brightness(img.get_pixel(x, y)),
                pixel_brightness(img.get_pixel(x + 1, y)),
                pixel_brightness(img.get_pixel(x, y + 1)),
                pixel_brightness(img.get_pixel(x + 1, y + 1)),
            ];
            let mean = v.iter().sum::<f64>() / 4.0;
            let var = v.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / 4.0;
            total += var.sqrt();
            blocks += 1;
        }
    }
    if blocks == 0 {
        return 0.0;
    }

    let factor = (brightness / 128.0).clamp(0.25, 1.5);
    total / blocks as f64 / factor
}

fn environment_hint(mean_rgb: [f64; 3], brightness: f64, avg_saturation: f64) -> EnvironmentHint {
    let [r, g, b] = mean_rgb;
    if r > 60.0 && r > g * 1.4 && r > b * 1.4 {
        EnvironmentHint::Hell
    } else if brightness > 170.0 && avg_saturation < 0.2 {
        EnvironmentHint::Snow
    } else if brightness < 50.0 {
        EnvironmentHint::Dark
    } else if brightness > 200.0 {
        EnvironmentHint::Bright
    } else {
        EnvironmentHint::Normal
    }
}

/// Derive a preprocessing configuration. Each rule may override the ones before it.
pub fn config_for(analysis: &SceneAnalysis) -> PreprocessConfig {
    let mut cfg = PreprocessConfig {
        contrast_factor: 1.5,
        normalize_colors: true,
        sharpening_factor: 0.0,
        reduce_noise: false,
        brightness_adjust: 0.0,
    };

    match analysis.brightness_level {
        BrightnessLevel::Dark => {
            cfg.contrast_factor = 1.3;
            cfg.brightness_adjust = 20.0;
        }
        BrightnessLevel::Bright => {
            cfg.contrast_factor = 1.4;
            cfg.brightness_adjust = -10.0;
        }
        BrightnessLevel::Normal => {}
    }

    match analysis.contrast_level {
        ContrastLevel::Low => cfg.contrast_factor *= 1.2,
        ContrastLevel::High => cfg.contrast_factor *= 0.85,
        ContrastLevel::Normal => {}
    }

    match analysis.noise_level {
        NoiseLevel::High => {
            cfg.reduce_noise = true;
            cfg.sharpening_factor = 0.0;
        }
        NoiseLevel::Medium => cfg.sharpening_factor = 0.2,
        NoiseLevel::Low => cfg.sharpening_factor = 0.4,
    }

    if analysis.heavy_effects {
        cfg.normalize_colors = false;
        cfg.contrast_factor = cfg.contrast_factor.min(1.2);
    }

    match analysis.environment {
        EnvironmentHint::Snow => {
            cfg.brightness_adjust = cfg.brightness_adjust.min(-15.0);
            cfg.contrast_factor = cfg.contrast_factor.max(1.6);
        }
        EnvironmentHint::Hell => {
            cfg.normalize_colors = true;
            cfg.contrast_factor = cfg.contrast_factor.min(1.4);
        }
        EnvironmentHint::Dark => {
            cfg.brightness_adjust = cfg.brightness_adjust.max(20.0);
        }
        EnvironmentHint::Bright => {
            cfg.brightness_adjust = cfg.brightness_adjust.min(-10.0);
        }
        EnvironmentHint::Normal => {}
    }

    cfg.clamped()
}
