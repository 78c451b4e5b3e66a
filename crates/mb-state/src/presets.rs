use crate::GridCalibration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Aspect ratios closer than this share presets
const ASPECT_TOLERANCE: f64 = 0.01;

/// Known-good grid layout for one resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPreset {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub calibration: GridCalibration,
}

impl GridPreset {
    fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

pub fn resolution_key(width: u32, height: u32) -> String {
    format!("{}x{}", width, height)
}

/// Grid presets keyed by resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetStore {
    presets: BTreeMap<String, GridPreset>,
}

impl PresetStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No preset file at {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let store: PresetStore =
            serde_json::from_str(&content).context("Failed to parse grid presets")?;
        info!("Loaded {} grid presets", store.presets.len());
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to encode presets")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn insert(&mut self, preset: GridPreset) {
        let key = resolution_key(preset.width, preset.height);
        info!("Stored grid preset '{}' for {}", preset.name, key);
        self.presets.insert(key, preset);
    }

    pub fn get_exact(&self, width: u32, height: u32) -> Option<&GridPreset> {
        self.presets.get(&resolution_key(width, height))
    }

    /// Calibration for a resolution: an exact preset, else the closest preset
    /// with the same aspect ratio scaled to fit.
    pub fn find(&self, width: u32, height: u32) -> Option<GridCalibration> {
        if let Some(preset) = self.get_exact(width, height) {
            return Some(preset.calibration.clone());
        }
        if width == 0 || height == 0 {
            return None;
        }

        let aspect = width as f64 / height as f64;
        let preset = self
            .presets
            .values()
            .filter(|p| (p.aspect() - aspect).abs() / aspect <= ASPECT_TOLERANCE)
            .min_by_key(|p| p.width.abs_diff(width))?;

        debug!(
            "Scaling preset '{}' ({}x{}) to {}x{}",
            preset.name, preset.width, preset.height, width, height
        );
        Some(preset.calibration.scaled(
            width as f64 / preset.width as f64,
            height as f64 / preset.height as f64,
        ))
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset_1080p() -> GridPreset {
        GridPreset {
            name: "hotbar".to_string(),
            width: 1920,
            height: 1080,
            calibration: GridCalibration {
                x_offset: 600,
                y_offset: 980,
                icon_width: 64,
                icon_height: 64,
                x_spacing: 8,
                y_spacing: 8,
                icons_per_row: 10,
                rows: 1,
                total_slots: 10,
            },
        }
    }

    #[test]
    fn test_exact_and_scaled_lookup() {
        let mut store = PresetStore::default();
        store.insert(preset_1080p());

        assert_eq!(store.find(1920, 1080).unwrap().icon_width, 64);

        let scaled = store.find(2560, 1440).unwrap();
        assert_eq!(scaled.icon_width, 85);
        assert_eq!(scaled.x_offset, 800);
        assert_eq!(scaled.icons_per_row, 10);

        assert!(store.find(1280, 1024).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let mut store = PresetStore::default();
        store.insert(preset_1080p());
        let path = std::env::temp_dir().join(format!("mb_presets_{}.json", std::process::id()));
        store.save(&path).unwrap();
        let loaded = PresetStore::load(&path).unwrap();
        assert_eq!(loaded.get_exact(1920, 1080), Some(&preset_1080p()));
        let _ = std::fs::remove_file(&path);
    }
}
