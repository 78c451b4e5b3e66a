use mb_capture::Roi;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod feedback;
pub mod presets;
pub mod ranking;

pub use cache::{content_hash, CacheConfig, ResultCache};
pub use feedback::{Correction, CorrectionBatch, CORRECTION_FORMAT_VERSION};
pub use presets::{GridPreset, PresetStore};
pub use ranking::{
    NeutralWeights, RankingConfig, RankingStore, TemplateRanking, TemplateWeights,
    VerifiedOutcome,
};

/// Highest confidence ever reported; 1.0 is reserved for a perfect match.
pub const MAX_CONFIDENCE: f64 = 0.99;

pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, MAX_CONFIDENCE)
}

/// How a detection was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    TemplateMatch,
    IconSimilarity,
    Hybrid,
}

/// One recognized entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub entity_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub position: Option<Roi>,
    pub method: DetectionMethod,
    /// Template that carried the decision, for feedback
    #[serde(default)]
    pub template_id: Option<String>,
}

impl DetectionResult {
    pub fn new(entity_id: impl Into<String>, confidence: f64, method: DetectionMethod) -> Self {
        Self {
            entity_id: entity_id.into(),
            confidence: clamp_confidence(confidence),
            position: None,
            method,
            template_id: None,
        }
    }

    pub fn at(mut self, position: Roi) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }
}

/// One resolved grid layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCalibration {
    pub x_offset: u32,
    pub y_offset: u32,
    pub icon_width: u32,
    pub icon_height: u32,
    /// Gap between adjacent cells
    pub x_spacing: u32,
    pub y_spacing: u32,
    pub icons_per_row: u32,
    pub rows: u32,
    pub total_slots: u32,
}

impl GridCalibration {
    /// Absolute floor on icon size; anything smaller is noise
    pub const MIN_ICON_SIZE: u32 = 22;

    pub fn icons_too_small(&self) -> bool {
        self.icon_width < Self::MIN_ICON_SIZE || self.icon_height < Self::MIN_ICON_SIZE
    }

    pub fn cell(&self, row: u32, col: u32) -> Roi {
        Roi::new(
            self.x_offset
                .saturating_add(col.saturating_mul(self.icon_width.saturating_add(self.x_spacing))),
            self.y_offset
                .saturating_add(row.saturating_mul(self.icon_height.saturating_add(self.y_spacing))),
            self.icon_width,
            self.icon_height,
        )
        .with_label(format!("r{}c{}", row, col))
    }

    /// Row-major cells, at most `total_slots` of them
    pub fn cells(&self) -> Vec<Roi> {
        (0..self.rows)
            .flat_map(|row| (0..self.icons_per_row).map(move |col| (row, col)))
            .take(self.total_slots as usize)
            .map(|(row, col)| self.cell(row, col))
            .collect()
    }

    /// Rescale to another resolution; counts stay the same.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        let sc = |v: u32, s: f64| (v as f64 * s).round() as u32;
        Self {
            x_offset: sc(self.x_offset, sx),
            y_offset: sc(self.y_offset, sy),
            icon_width: sc(self.icon_width, sx),
            icon_height: sc(self.icon_height, sy),
            x_spacing: sc(self.x_spacing, sx),
            y_spacing: sc(self.y_spacing, sy),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(DetectionResult::new("a", 1.3, DetectionMethod::Hybrid).confidence, 0.99);
        assert_eq!(DetectionResult::new("a", -0.2, DetectionMethod::Hybrid).confidence, 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_grid_cells() {
        let grid = GridCalibration {
            x_offset: 10,
            y_offset: 100,
            icon_width: 40,
            icon_height: 40,
            x_spacing: 4,
            y_spacing: 6,
            icons_per_row: 3,
            rows: 2,
            total_slots: 5,
        };
        let cells = grid.cells();
        assert_eq!(cells.len(), 5);
        assert_eq!((cells[1].x, cells[1].y), (54, 100));
        assert_eq!((cells[3].x, cells[3].y), (10, 146));
        assert_eq!(cells[4].label.as_deref(), Some("r1c1"));
        assert!(!grid.icons_too_small());
    }

    #[test]
    fn test_cell_saturates_on_huge_layout() {
        let grid = GridCalibration {
            x_offset: u32::MAX - 10,
            y_offset: 5,
            icon_width: u32::MAX,
            icon_height: 40,
            x_spacing: 8,
            y_spacing: u32::MAX,
            icons_per_row: 4,
            rows: 2,
            total_slots: 8,
        };
        let cell = grid.cell(1, 3);
        assert_eq!(cell.x, u32::MAX);
        assert_eq!(cell.y, u32::MAX);
        assert_eq!(grid.cell(0, 0).x, u32::MAX - 10);
    }

    #[test]
    fn test_small_icons_flagged() {
        let grid = GridCalibration {
            icon_width: 18,
            icon_height: 40,
            ..Default::default()
        };
        assert!(grid.icons_too_small());
    }
}
