use super::borders::CellEdge;
use super::metrics::IconMetrics;
use super::CalibrationConfig;
use mb_capture::Roi;
use mb_state::GridCalibration;
use serde::{Deserialize, Serialize};

/// Cell rectangles and the layout that produced them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    pub cells: Vec<Roi>,
    pub calibration: GridCalibration,
}

impl GridResult {
    pub fn from_calibration(calibration: GridCalibration) -> Self {
        Self {
            cells: calibration.cells(),
            calibration,
        }
    }
}

/// Tile cells from the first measured edge (or a centred row when the
/// metrics are defaults) until the frame edge or the row/column limits.
pub fn build_grid(
    frame_width: u32,
    frame_height: u32,
    metrics: &IconMetrics,
    edges: &[CellEdge],
    config: &CalibrationConfig,
) -> GridResult {
    let pitch_x = metrics.icon_width + metrics.spacing;
    let pitch_y = metrics.icon_height + metrics.spacing;
    if metrics.icon_width == 0 || metrics.icon_height == 0 {
        return GridResult::default();
    }

    let (x_offset, max_columns) = match edges.first() {
        Some(first) if !metrics.is_default => (first.x, config.max_columns),
        _ => {
            let columns = config.default_columns.max(1);
            let total = columns * pitch_x - metrics.spacing;
            (frame_width.saturating_sub(total) / 2, columns)
        }
    };

    let columns = if x_offset + metrics.icon_width > frame_width {
        0
    } else {
        ((frame_width - x_offset - metrics.icon_width) / pitch_x + 1).min(max_columns)
    };
    let rows = if metrics.top + metrics.icon_height > frame_height {
        0
    } else {
        ((frame_height - metrics.top - metrics.icon_height) / pitch_y + 1).min(config.max_rows)
    };

    GridResult::from_calibration(GridCalibration {
        x_offset,
        y_offset: metrics.top,
        icon_width: metrics.icon_width,
        icon_height: metrics.icon_height,
        x_spacing: metrics.spacing,
        y_spacing: metrics.spacing,
        icons_per_row: columns,
        rows,
        total_slots: columns * rows,
    })
}
