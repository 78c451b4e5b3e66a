use crate::preprocess::{enhance_contrast, normalize_colors};
use image::RgbaImage;
use mb_state::clamp_confidence;
use serde::{Deserialize, Serialize};

/// Contrast applied to both sides before any metric is computed
const SIMILARITY_CONTRAST: f64 = 1.5;
/// SSIM stabilizers for 8-bit data
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
/// 8 bins per channel, 32 values wide
const HIST_BINS: usize = 512;
const EDGE_STRIDE: u32 = 2;

/// The four independent metrics, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScores {
    pub ncc: f64,
    pub ssim: f64,
    pub histogram: f64,
    pub edge: f64,
}

impl SimilarityScores {
    pub fn as_array(&self) -> [f64; 4] {
        [self.ncc, self.ssim, self.histogram, self.edge]
    }

    pub fn max(&self) -> f64 {
        self.as_array().into_iter().fold(0.0, f64::max)
    }
}

/// Relative emphasis of each metric for a strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub ncc: f64,
    pub ssim: f64,
    pub histogram: f64,
    pub edge: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            ncc: 1.0,
            ssim: 1.0,
            histogram: 1.0,
            edge: 1.0,
        }
    }
}

impl MetricWeights {
    pub fn weighted_mean(&self, scores: &SimilarityScores) -> f64 {
        let w = [self.ncc, self.ssim, self.histogram, self.edge];
        let total: f64 = w.iter().map(|v| v.max(0.0)).sum();
        if total <= 0.0 {
            return 0.0;
        }
        w.iter()
            .zip(scores.as_array())
            .map(|(w, s)| w.max(0.0) * s)
            .sum::<f64>()
            / total
    }
}

/// Agreement bonus and weighted blending, tunable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    /// Metrics within this distance of the best one count as agreeing
    pub agreement_window: f64,
    /// Added per agreeing metric
    pub agreement_bonus: f64,
    /// Share of the weighted mean when a strategy overrides metric weights
    pub weighted_blend: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            agreement_window: 0.1,
            agreement_bonus: 0.02,
            weighted_blend: 0.5,
        }
    }
}

/// Best metric plus a small bonus for every other metric that agrees with it
pub fn fuse(scores: &SimilarityScores, params: &FusionParams) -> f64 {
    let values = scores.as_array();
    let best = scores.max();
    let agreeing = values
        .iter()
        .filter(|&&v| best - v <= params.agreement_window)
        .count()
        .saturating_sub(1);
    clamp_confidence(best + params.agreement_bonus * agreeing as f64)
}

/// Like [`fuse`], blended with a weighted mean when weights are given.
pub fn fuse_weighted(
    scores: &SimilarityScores,
    weights: Option<&MetricWeights>,
    params: &FusionParams,
) -> f64 {
    let base = fuse(scores, params);
    match weights {
        Some(w) => {
            let blend = params.weighted_blend.clamp(0.0, 1.0);
            clamp_confidence(base * (1.0 - blend) + w.weighted_mean(scores) * blend)
        }
        None => base,
    }
}

/// Per-image statistics reused across comparisons
#[derive(Debug, Clone)]
pub struct Features {
    width: u32,
    height: u32,
    gray: Vec<f64>,
    mean: f64,
    variance: f64,
    histogram: Vec<f64>,
    gradient: Vec<f64>,
}

impl Features {
    /// Run the mandatory contrast + normalization step, then extract.
    pub fn from_image(img: &RgbaImage) -> Self {
        Self::from_prepared(&prepare(img))
    }

    pub fn from_prepared(img: &RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        let gray: Vec<f64> = img
            .pixels()
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .collect();

        let n = gray.len().max(1) as f64;
        let mean = gray.iter().sum::<f64>() / n;
        let variance = gray.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mut histogram = vec![0.0; HIST_BINS];
        for p in img.pixels() {
            let bin = ((p[0] as usize >> 5) << 6) | ((p[1] as usize >> 5) << 3) | (p[2] as usize >> 5);
            histogram[bin] += 1.0;
        }
        for v in &mut histogram {
            *v /= n;
        }

        let mut gradient = Vec::new();
        if width >= 2 && height >= 2 {
            for y in (0..height - 1).step_by(EDGE_STRIDE as usize) {
                for x in (0..width - 1).step_by(EDGE_STRIDE as usize) {
                    let i = (y * width + x) as usize;
                    let gx = gray[i + 1] - gray[i];
                    let gy = gray[i + width as usize] - gray[i];
                    gradient.push((gx * gx + gy * gy).sqrt());
                }
            }
        }

        Self {
            width,
            height,
            gray,
            mean,
            variance,
            histogram,
            gradient,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.gray.is_empty()
    }

    pub fn compare(&self, other: &Features) -> SimilarityScores {
        if self.dimensions() != other.dimensions() || self.is_empty() {
            return SimilarityScores::default();
        }
        let covariance = self
            .gray
            .iter()
            .zip(&other.gray)
            .map(|(a, b)| (a - self.mean) * (b - other.mean))
            .sum::<f64>()
            / self.gray.len() as f64;

        SimilarityScores {
            ncc: ncc(self, other, covariance),
            ssim: ssim(self, other, covariance),
            histogram: histogram_intersection(&self.histogram, &other.histogram),
            edge: edge_correlation(&self.gradient, &other.gradient),
        }
    }
}

/// Contrast ×1.5 followed by full-range colour normalization
pub fn prepare(img: &RgbaImage) -> RgbaImage {
    normalize_colors(&enhance_contrast(img, SIMILARITY_CONTRAST), 1)
}

/// Fused similarity of a cell and a template of the same size.
/// A cell of a different size is resized to the template first.
pub fn similarity(cell: &RgbaImage, template: &RgbaImage) -> f64 {
    fuse(&compare(cell, template), &FusionParams::default())
}

pub fn compare(cell: &RgbaImage, template: &RgbaImage) -> SimilarityScores {
    if cell.width() == 0 || cell.height() == 0 || template.width() == 0 || template.height() == 0
    {
        return SimilarityScores::default();
    }
    let resized;
    let cell = if cell.dimensions() != template.dimensions() {
        resized = image::imageops::resize(
            cell,
            template.width(),
            template.height(),
            image::imageops::FilterType::Triangle,
        );
        &resized
    } else {
        cell
    };
    Features::from_image(cell).compare(&Features::from_image(template))
}

/// Pearson correlation rescaled from [-1, 1] to [0, 1]
fn ncc(a: &Features, b: &Features, covariance: f64) -> f64 {
    let denom = (a.variance * b.variance).sqrt();
    let r = if denom < 1e-10 {
        0.0
    } else {
        (covariance / denom).clamp(-1.0, 1.0)
    };
    (r + 1.0) / 2.0
}

/// Single-window SSIM rescaled to [0, 1]
fn ssim(a: &Features, b: &Features, covariance: f64) -> f64 {
    let num = (2.0 * a.mean * b.mean + SSIM_C1) * (2.0 * covariance + SSIM_C2);
    let den = (a.mean * a.mean + b.mean * b.mean + SSIM_C1) * (a.variance + b.variance + SSIM_C2);
    let s = (num / den).clamp(-1.0, 1.0);
    (s + 1.0) / 2.0
}

fn histogram_intersection(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.min(*y))
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Cosine similarity of gradient magnitude fields; flat images have no edges to agree on.
fn edge_correlation(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na < 1e-9 || nb < 1e-9 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}
