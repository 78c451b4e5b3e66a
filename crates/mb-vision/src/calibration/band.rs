use super::profile::{find_segments, moving_average, row_edge_energy};
use super::CalibrationConfig;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Horizontal strip holding the hotbar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandRegion {
    pub y: u32,
    pub height: u32,
    pub confidence: f64,
}

impl BandRegion {
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }
}

/// Find the strip of rows near the bottom of the frame with the strongest
/// horizontal edge signature.
///
/// Icon artwork is busy while the HUD background around it is mostly flat,
/// so the hotbar shows up as a plateau in per-row edge energy.
pub fn find_band(frame: &RgbaImage, config: &CalibrationConfig) -> BandRegion {
    let h = frame.height();
    let search_top = ((h as f64 * config.band_search_start.clamp(0.0, 1.0)) as u32).min(h);
    let search_bottom = ((h as f64 * config.band_search_end.clamp(0.0, 1.0)) as u32).clamp(search_top, h);
    let fallback = BandRegion {
        y: search_top,
        height: search_bottom - search_top,
        confidence: 0.0,
    };
    if search_bottom <= search_top || frame.width() < 2 {
        return fallback;
    }

    let raw: Vec<f64> = (search_top..search_bottom)
        .map(|y| row_edge_energy(frame, y))
        .collect();
    let profile = moving_average(&raw, config.smoothing_window.max(1));
    let peak = profile.iter().copied().fold(0.0, f64::max);
    if peak < config.min_band_energy {
        debug!("No edge energy in band search area (peak {:.2})", peak);
        return fallback;
    }

    let threshold = peak * config.band_energy_ratio;
    let min_len = (mb_state::GridCalibration::MIN_ICON_SIZE / 2) as usize;
    let Some((start, end)) = find_segments(&profile, threshold, min_len)
        .into_iter()
        .max_by(|a, b| {
            let sa: f64 = profile[a.0..a.1].iter().sum();
            let sb: f64 = profile[b.0..b.1].iter().sum();
            sa.total_cmp(&sb)
        })
    else {
        return fallback;
    };

    let inside = profile[start..end].iter().sum::<f64>() / (end - start) as f64;
    let outside_count = profile.len() - (end - start);
    let mut confidence = if outside_count == 0 {
        0.5
    } else {
        let outside = (profile[..start].iter().sum::<f64>() + profile[end..].iter().sum::<f64>())
            / outside_count as f64;
        ((inside - outside) / inside).clamp(0.0, 1.0)
    };
    // A plateau spanning nearly the whole search area is texture, not a bar
    if (end - start) as f64 > profile.len() as f64 * 0.8 {
        confidence *= 0.5;
    }

    let len = (end - start) as u32;
    let pad = ((len as f64 * config.band_padding) as u32).max(4);
    let y = (search_top + start as u32).saturating_sub(pad);
    let bottom = (search_top + end as u32 + pad).min(h);

    debug!(
        "Band at y={}..{} (energy plateau {}..{}, confidence {:.2})",
        y,
        bottom,
        search_top + start as u32,
        search_top + end as u32,
        confidence
    );
    BandRegion {
        y,
        height: bottom - y,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_band_found_around_textured_strip() {
        let frame = RgbaImage::from_fn(200, 200, |x, y| {
            if (150..180).contains(&y) {
                let v = ((x * 37 + y * 11) % 200) as u8;
                Rgba([v, v, v, 255])
            } else {
                Rgba([20, 22, 28, 255])
            }
        });
        let band = find_band(&frame, &CalibrationConfig::default());
        assert!(band.y <= 150 && band.bottom() >= 180, "{:?}", band);
        assert!(band.confidence > 0.8);
    }

    #[test]
    fn test_flat_frame_has_zero_confidence() {
        let frame = RgbaImage::from_pixel(100, 100, Rgba([20, 22, 28, 255]));
        let band = find_band(&frame, &CalibrationConfig::default());
        assert_eq!(band.confidence, 0.0);
    }
}
