//! Geometry calibration: find the hotbar, its frame lines and icon size,
//! tile a grid of cells and keep the ones that hold something.

mod band;
mod borders;
mod grid;
mod metrics;
mod profile;
mod validate;

pub use band::{find_band, BandRegion};
pub use borders::{detect_borders, BorderResult, CellEdge};
pub use grid::{build_grid, GridResult};
pub use metrics::{estimate_metrics, IconMetrics};
pub use validate::{cell_stats, is_empty_cell, validate_cells, ValidationResult};

use image::RgbaImage;
use mb_state::GridCalibration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IconsTooSmall,
    LikelyEmptyScreen,
    InconsistentDetection,
    NoVerticalClusters,
    ExceptionThrown,
}

impl FailureReason {
    pub fn tag(self) -> &'static str {
        match self {
            FailureReason::IconsTooSmall => "icons_too_small",
            FailureReason::LikelyEmptyScreen => "likely_empty_screen",
            FailureReason::InconsistentDetection => "inconsistent_detection",
            FailureReason::NoVerticalClusters => "no_vertical_clusters",
            FailureReason::ExceptionThrown => "exception_thrown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Blend of the three calibration signals into one confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub band: f64,
    pub metrics: f64,
    pub validation: f64,
    /// Below this many accepted cells the validation weight moves to metrics
    pub small_sample: usize,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            band: 0.25,
            metrics: 0.45,
            validation: 0.30,
            small_sample: 4,
        }
    }
}

impl ConfidenceWeights {
    pub fn combine(&self, band: f64, metrics: f64, validation: f64, accepted: usize) -> f64 {
        let sample = if self.small_sample == 0 {
            1.0
        } else {
            (accepted as f64 / self.small_sample as f64).min(1.0)
        };
        let validation_w = self.validation * sample;
        let metrics_w = self.metrics + self.validation * (1.0 - sample);
        let total = self.band + metrics_w + validation_w;
        if total <= 0.0 {
            return 0.0;
        }
        ((band * self.band + metrics * metrics_w + validation * validation_w) / total).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Band search window as fractions of frame height
    pub band_search_start: f64,
    pub band_search_end: f64,
    /// Rows whose smoothed edge energy exceeds this share of the peak join the band
    pub band_energy_ratio: f64,
    /// Below this peak energy the search area is considered flat
    pub min_band_energy: f64,
    pub smoothing_window: usize,
    /// Extra rows kept above and below the plateau, relative to its height
    pub band_padding: f64,
    /// A frame line must cover this share of the band height
    pub border_min_run_fraction: f64,
    pub max_border_width: u32,
    pub min_edges_for_metrics: usize,
    /// Fallback icon size relative to frame height
    pub default_icon_fraction: f64,
    /// Fallback gap relative to icon size
    pub default_spacing_fraction: f64,
    pub default_metrics_confidence: f64,
    pub default_columns: u32,
    pub max_columns: u32,
    pub max_rows: u32,
    /// Share of each side ignored when sampling cell content
    pub cell_inset: f64,
    pub empty_cell_std: f64,
    pub empty_cell_mean: f64,
    pub min_band_confidence: f64,
    pub min_edges: usize,
    /// Accepted cells per detected edge below which detection is inconsistent
    pub min_accepted_per_edge: f64,
    pub weights: ConfidenceWeights,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            band_search_start: 0.55,
            band_search_end: 1.0,
            band_energy_ratio: 0.35,
            min_band_energy: 1.0,
            smoothing_window: 5,
            band_padding: 0.15,
            border_min_run_fraction: 0.5,
            max_border_width: 8,
            min_edges_for_metrics: 4,
            default_icon_fraction: 0.0593,
            default_spacing_fraction: 0.125,
            default_metrics_confidence: 0.3,
            default_columns: 10,
            max_columns: 40,
            max_rows: 3,
            cell_inset: 0.15,
            empty_cell_std: 8.0,
            empty_cell_mean: 20.0,
            min_band_confidence: 0.4,
            min_edges: 3,
            min_accepted_per_edge: 0.25,
            weights: ConfidenceWeights::default(),
        }
    }
}

/// Everything one calibration run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub success: bool,
    pub grid: GridResult,
    pub validation: ValidationResult,
    pub band: BandRegion,
    pub borders: BorderResult,
    pub metrics: Option<IconMetrics>,
}

impl CalibrationOutcome {
    fn failed(reason: FailureReason) -> Self {
        Self {
            success: false,
            grid: GridResult::default(),
            validation: ValidationResult {
                reasons: vec![reason],
                ..Default::default()
            },
            band: BandRegion::default(),
            borders: BorderResult::default(),
            metrics: None,
        }
    }

    pub fn reasons(&self) -> &[FailureReason] {
        &self.validation.reasons
    }
}

/// Calibrate the icon grid of a full frame.
///
/// Never panics: anything unexpected comes back as a failed outcome tagged
/// `exception_thrown`.
pub fn calibrate(
    frame: &RgbaImage,
    config: &CalibrationConfig,
    preset: Option<&GridCalibration>,
) -> CalibrationOutcome {
    match catch_unwind(AssertUnwindSafe(|| run(frame, config, preset))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Calibration aborted: {}", message);
            CalibrationOutcome::failed(FailureReason::ExceptionThrown)
        }
    }
}

fn run(frame: &RgbaImage, config: &CalibrationConfig, preset: Option<&GridCalibration>) -> CalibrationOutcome {
    let (w, h) = frame.dimensions();

    let (band, borders, metrics, grid) = match preset {
        Some(preset) => {
            debug!(
                "Using preset grid {}x{} at ({}, {})",
                preset.icon_width, preset.icon_height, preset.x_offset, preset.y_offset
            );
            let band = BandRegion {
                y: preset.y_offset,
                height: preset
                    .rows
                    .saturating_mul(preset.icon_height.saturating_add(preset.y_spacing)),
                confidence: 1.0,
            };
            let metrics = IconMetrics {
                icon_width: preset.icon_width,
                icon_height: preset.icon_height,
                spacing: preset.x_spacing,
                top: preset.y_offset,
                is_default: false,
                confidence: 0.9,
            };
            let grid = GridResult::from_calibration(preset.clone());
            (band, None, metrics, grid)
        }
        None => {
            let band = find_band(frame, config);
            let borders = detect_borders(frame, &band, config);
            let metrics = estimate_metrics(&borders.edges, &band, h, config);
            let grid = build_grid(w, h, &metrics, &borders.edges, config);
            (band, Some(borders), metrics, grid)
        }
    };

    let mut validation = validate_cells(frame, &grid.cells, config);
    validation.confidence = config.weights.combine(
        band.confidence,
        metrics.confidence,
        validation.cell_confidence,
        validation.cells.len(),
    );

    let edge_count = borders.as_ref().map_or(0, |b| b.edges.len());
    let mut zeroed = false;

    if grid.calibration.icons_too_small() {
        validation.reasons.push(FailureReason::IconsTooSmall);
        zeroed = true;
    }
    if borders.is_some() {
        if band.confidence < config.min_band_confidence
            && edge_count < config.min_edges
            && metrics.is_default
        {
            validation.reasons.push(FailureReason::LikelyEmptyScreen);
            zeroed = true;
        }
        if edge_count >= config.min_edges
            && (validation.cells.len() as f64) < edge_count as f64 * config.min_accepted_per_edge
        {
            validation.reasons.push(FailureReason::InconsistentDetection);
            zeroed = true;
        }
        if edge_count == 0 {
            validation.reasons.push(FailureReason::NoVerticalClusters);
        }
    }

    if zeroed {
        validation.zero();
    }
    let success = !zeroed && !validation.cells.is_empty();

    if validation.reasons.is_empty() {
        info!(
            "Calibrated {} of {} cells (icon {}x{}, confidence {:.2})",
            validation.cells.len(),
            grid.cells.len(),
            grid.calibration.icon_width,
            grid.calibration.icon_height,
            validation.confidence
        );
    } else {
        let tags: Vec<&str> = validation.reasons.iter().map(|r| r.tag()).collect();
        warn!(
            "Calibration flagged [{}], {} cells kept",
            tags.join(", "),
            validation.cells.len()
        );
    }

    CalibrationOutcome {
        success,
        grid,
        validation,
        band,
        borders: borders.unwrap_or_default(),
        metrics: Some(metrics),
    }
}
