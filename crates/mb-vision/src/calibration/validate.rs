use super::profile::luma;
use super::{CalibrationConfig, FailureReason};
use image::RgbaImage;
use mb_capture::{crop_roi, Roi};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Cells that look like they hold an icon
    pub cells: Vec<Roi>,
    /// Overall calibration confidence
    pub confidence: f64,
    /// Plausibility of the accepted cells alone
    pub cell_confidence: f64,
    pub rejected: usize,
    pub reasons: Vec<FailureReason>,
}

impl ValidationResult {
    /// Drop every cell and force confidence to zero
    pub(crate) fn zero(&mut self) {
        self.rejected += self.cells.len();
        self.cells.clear();
        self.confidence = 0.0;
        self.cell_confidence = 0.0;
    }
}

/// Brightness mean and population stddev of the inner part of a cell
pub fn cell_stats(frame: &RgbaImage, roi: &Roi, inset: f64) -> Option<(f64, f64)> {
    let inner = crop_roi(frame, &roi.inset(inset))?;
    let n = (inner.width() * inner.height()) as f64;
    let values: Vec<f64> = inner.pixels().map(luma).collect();
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Flat or near-black interiors are empty slots or HUD background.
pub fn is_empty_cell(frame: &RgbaImage, roi: &Roi, config: &CalibrationConfig) -> bool {
    match cell_stats(frame, roi, config.cell_inset) {
        Some((mean, std)) => std < config.empty_cell_std || mean < config.empty_cell_mean,
        None => true,
    }
}

pub fn validate_cells(frame: &RgbaImage, cells: &[Roi], config: &CalibrationConfig) -> ValidationResult {
    let mut accepted = Vec::new();
    let mut plausibility = 0.0;

    for cell in cells {
        let Some((mean, std)) = cell_stats(frame, cell, config.cell_inset) else {
            continue;
        };
        if std < config.empty_cell_std || mean < config.empty_cell_mean {
            continue;
        }
        plausibility += (std / (config.empty_cell_std * 4.0)).min(1.0);
        accepted.push(cell.clone());
    }

    let rejected = cells.len() - accepted.len();
    let cell_confidence = if accepted.is_empty() {
        0.0
    } else {
        plausibility / accepted.len() as f64
    };
    debug!(
        "Validated {} of {} cells ({} empty)",
        accepted.len(),
        cells.len(),
        rejected
    );
    ValidationResult {
        cells: accepted,
        confidence: 0.0,
        cell_confidence,
        rejected,
        reasons: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn frame() -> RgbaImage {
        RgbaImage::from_fn(100, 40, |x, y| {
            if x < 40 {
                let v = (60 + (x * 29 + y * 17) % 150) as u8;
                Rgba([v, v, v, 255])
            } else {
                Rgba([20, 22, 28, 255])
            }
        })
    }

    #[test]
    fn test_textured_cell_kept_flat_cell_dropped() {
        let cells = vec![Roi::new(2, 2, 36, 36), Roi::new(50, 2, 36, 36)];
        let result = validate_cells(&frame(), &cells, &CalibrationConfig::default());
        assert_eq!(result.cells, vec![Roi::new(2, 2, 36, 36)]);
        assert_eq!(result.rejected, 1);
        assert!(result.cell_confidence > 0.5);
    }

    #[test]
    fn test_out_of_frame_cell_is_empty() {
        let config = CalibrationConfig::default();
        assert!(is_empty_cell(&frame(), &Roi::new(200, 200, 10, 10), &config));
        assert!(is_empty_cell(&frame(), &Roi::new(50, 2, 36, 36), &config));
        assert!(!is_empty_cell(&frame(), &Roi::new(2, 2, 36, 36), &config));
    }
}
