use super::band::BandRegion;
use super::borders::CellEdge;
use super::profile::tolerant_mode;
use super::CalibrationConfig;
use mb_state::GridCalibration;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Measured (or assumed) icon geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconMetrics {
    pub icon_width: u32,
    pub icon_height: u32,
    /// Gap between neighbouring icons
    pub spacing: u32,
    /// Top edge of the first icon row
    pub top: u32,
    /// Resolution-scaled defaults rather than measurements
    pub is_default: bool,
    pub confidence: f64,
}

impl IconMetrics {
    /// Defaults scaled from the frame height, centred on the band
    pub fn fallback(frame_height: u32, band: &BandRegion, config: &CalibrationConfig) -> Self {
        let icon = (frame_height as f64 * config.default_icon_fraction).round() as u32;
        let spacing = (icon as f64 * config.default_spacing_fraction).round() as u32;
        let top = (band.y + band.height / 2).saturating_sub(icon / 2);
        Self {
            icon_width: icon,
            icon_height: icon,
            spacing,
            top,
            is_default: true,
            confidence: config.default_metrics_confidence,
        }
    }
}

/// Derive icon size and spacing from the distances between frame edges.
///
/// Two consecutive edges either bracket an icon (outer span at least the
/// minimum icon size) or a gap. The tolerant mode of each population wins,
/// so a few missing or spurious edges do not move the result.
pub fn estimate_metrics(
    edges: &[CellEdge],
    band: &BandRegion,
    frame_height: u32,
    config: &CalibrationConfig,
) -> IconMetrics {
    if edges.len() < config.min_edges_for_metrics {
        debug!(
            "Only {} edges, falling back to default icon metrics",
            edges.len()
        );
        return IconMetrics::fallback(frame_height, band, config);
    }

    let spans: Vec<u32> = edges
        .windows(2)
        .map(|w| w[1].end() - w[0].x)
        .filter(|&span| span >= GridCalibration::MIN_ICON_SIZE)
        .collect();
    let Some((icon_width, width_share)) = tolerant_mode(&spans) else {
        return IconMetrics::fallback(frame_height, band, config);
    };
    let width_tol = (icon_width / 10).max(2);

    let gaps: Vec<u32> = edges
        .windows(2)
        .filter(|w| (w[1].end() - w[0].x).abs_diff(icon_width) > width_tol)
        .map(|w| w[1].x.saturating_sub(w[0].end()))
        .filter(|&gap| gap < icon_width)
        .collect();
    let measured_gap = tolerant_mode(&gaps).map(|(gap, _)| gap);

    let runs: Vec<u32> = edges.iter().map(CellEdge::run).collect();
    let (icon_height, height_share) = tolerant_mode(&runs).unwrap_or((icon_width, 0.0));
    let tops: Vec<u32> = edges.iter().map(|e| e.top).collect();
    let top = tolerant_mode(&tops).map_or(band.y, |(top, _)| top);

    let mut confidence = width_share * 0.7 + height_share * 0.3;
    let spacing = match measured_gap {
        Some(gap) => gap,
        None => {
            confidence *= 0.9;
            (icon_width as f64 * config.default_spacing_fraction).round() as u32
        }
    };

    debug!(
        "Icon metrics: {}x{} spacing {} top {} (confidence {:.2})",
        icon_width, icon_height, spacing, top, confidence
    );
    IconMetrics {
        icon_width,
        icon_height,
        spacing,
        top,
        is_default: false,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_data::Rarity;

    fn edge(x: u32) -> CellEdge {
        CellEdge {
            x,
            width: 3,
            top: 600,
            bottom: 664,
            rarity: Rarity::Rare,
            strength: 0.9,
        }
    }

    /// Left and right frame lines of `n` icons, 64 wide with 8px gaps
    fn row_edges(n: u32) -> Vec<CellEdge> {
        (0..n)
            .flat_map(|i| {
                let x = 100 + i * 72;
                [edge(x), edge(x + 61)]
            })
            .collect()
    }

    #[test]
    fn test_measures_regular_row() {
        let band = BandRegion::default();
        let metrics = estimate_metrics(&row_edges(5), &band, 1080, &CalibrationConfig::default());
        assert!(!metrics.is_default);
        assert_eq!(metrics.icon_width, 64);
        assert_eq!(metrics.icon_height, 64);
        assert_eq!(metrics.spacing, 8);
        assert_eq!(metrics.top, 600);
        assert!(metrics.confidence > 0.9);
    }

    #[test]
    fn test_survives_missing_edge() {
        let mut edges = row_edges(6);
        edges.remove(5);
        let band = BandRegion::default();
        let metrics = estimate_metrics(&edges, &band, 1080, &CalibrationConfig::default());
        assert_eq!(metrics.icon_width, 64);
        assert_eq!(metrics.spacing, 8);
    }

    #[test]
    fn test_few_edges_fall_back() {
        let band = BandRegion {
            y: 980,
            height: 80,
            confidence: 0.2,
        };
        let metrics = estimate_metrics(&row_edges(1), &band, 1080, &CalibrationConfig::default());
        assert!(metrics.is_default);
        assert_eq!(metrics.icon_width, 64);
        assert_eq!(metrics.spacing, 8);
        assert_eq!(metrics.confidence, 0.3);
    }
}
