use crate::calibration::{is_empty_cell, CalibrationConfig};
use crate::ensemble::Ensemble;
use crate::nms::non_max_suppression;
use crate::preprocess::{self, PreprocessConfig};
use crate::scene::{self, SceneAnalysis, SceneThresholds};
use image::RgbaImage;
use mb_capture::{crop_roi, Roi};
use mb_data::Rarity;
use mb_state::{DetectionMethod, DetectionResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Share of each side trimmed before matching, to drop the rarity frame
    pub frame_inset: f64,
    /// Share of the frame ring that must agree on a rarity to trust it
    pub rarity_ring_share: f64,
    pub nms_threshold: f64,
    /// Condition cells with the scene-derived preprocessing
    pub adaptive_preprocessing: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            frame_inset: 0.05,
            rarity_ring_share: 0.4,
            nms_threshold: crate::nms::DEFAULT_NMS_THRESHOLD,
            adaptive_preprocessing: true,
        }
    }
}

/// Detections for a frame plus what the recognizer saw along the way
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub detections: Vec<DetectionResult>,
    pub cells_scanned: usize,
    pub empty_cells: usize,
    /// Cells where no candidate passed
    pub unmatched_cells: usize,
    pub scene: SceneAnalysis,
    pub preprocess: PreprocessConfig,
}

/// Rarity of the frame drawn around a cell, read from its outer ring.
pub fn cell_rarity(cell: &RgbaImage, min_share: f64) -> Option<Rarity> {
    let (w, h) = cell.dimensions();
    if w < 4 || h < 4 {
        return None;
    }
    let ring = (w.min(h) / 20).max(2);
    let mut counts = [0usize; 5];
    let mut total = 0usize;
    for (x, y, px) in cell.enumerate_pixels() {
        let on_ring = x < ring || y < ring || x >= w - ring || y >= h - ring;
        if !on_ring {
            continue;
        }
        total += 1;
        if let Some(r) = Rarity::classify_border([px[0], px[1], px[2]]) {
            counts[r as usize] += 1;
        }
    }
    let (idx, &best) = counts.iter().enumerate().max_by_key(|(_, c)| **c)?;
    (total > 0 && best as f64 >= total as f64 * min_share).then(|| Rarity::ALL[idx])
}

/// Bounding box of a set of cells
fn cells_extent(cells: &[Roi]) -> Option<Roi> {
    let x = cells.iter().map(|c| c.x).min()?;
    let y = cells.iter().map(|c| c.y).min()?;
    let right = cells.iter().map(Roi::right).max()?;
    let bottom = cells.iter().map(Roi::bottom).max()?;
    Some(Roi::new(x, y, right - x, bottom - y))
}

pub struct Recognizer<'a> {
    pub ensemble: Ensemble<'a>,
    pub config: &'a RecognizerConfig,
    pub scene: &'a SceneThresholds,
    pub calibration: &'a CalibrationConfig,
}

impl<'a> Recognizer<'a> {
    /// Identify the icon in every non-empty cell.
    pub fn recognize(&self, frame: &RgbaImage, cells: &[Roi]) -> Recognition {
        let scene = cells_extent(cells)
            .and_then(|extent| crop_roi(frame, &extent))
            .map(|region| scene::analyze_with(&region, self.scene))
            .unwrap_or_default();
        let preprocess = if self.config.adaptive_preprocessing {
            scene::config_for(&scene)
        } else {
            PreprocessConfig::default()
        };
        debug!(
            "Scene {:?}/{:?}/{:?} env {:?} -> contrast {:.2} brightness {:+.0}",
            scene.brightness_level,
            scene.contrast_level,
            scene.noise_level,
            scene.environment,
            preprocess.contrast_factor,
            preprocess.brightness_adjust
        );

        let mut recognition = Recognition {
            scene,
            preprocess: preprocess.clone(),
            ..Default::default()
        };
        let mut detections = Vec::new();

        for cell in cells {
            if is_empty_cell(frame, cell, self.calibration) {
                recognition.empty_cells += 1;
                continue;
            }
            let Some(raw) = crop_roi(frame, cell) else {
                recognition.empty_cells += 1;
                continue;
            };
            recognition.cells_scanned += 1;

            let rarity = cell_rarity(&raw, self.config.rarity_ring_share);
            let inner = crop_roi(frame, &cell.inset(self.config.frame_inset)).unwrap_or(raw);
            let conditioned = if preprocess.is_identity() {
                inner
            } else {
                preprocess::apply(&inner, &preprocess)
            };

            match self.ensemble.evaluate(&conditioned, rarity) {
                Some(decision) if decision.confidence >= self.ensemble.voting.confidence_threshold => {
                    let label = cell.label.as_deref().unwrap_or("?");
                    debug!(
                        "Cell {}: {} ({:.3}, {}/{} strategies agree)",
                        label,
                        decision.entity_id,
                        decision.confidence,
                        decision.agreeing,
                        decision.total_detections
                    );
                    let mut det = DetectionResult::new(
                        decision.entity_id,
                        decision.confidence,
                        DetectionMethod::Hybrid,
                    )
                    .at(cell.clone());
                    det.template_id = decision.template_id;
                    detections.push(det);
                }
                other => {
                    if let Some(d) = other {
                        debug!(
                            "Cell {:?}: best guess {} at {:.3} below threshold",
                            cell.label, d.entity_id, d.confidence
                        );
                    }
                    recognition.unmatched_cells += 1;
                }
            }
        }

        recognition.detections = non_max_suppression(detections, self.config.nms_threshold);
        info!(
            "Recognized {} of {} occupied cells ({} empty)",
            recognition.detections.len(),
            recognition.cells_scanned,
            recognition.empty_cells
        );
        recognition
    }
}
