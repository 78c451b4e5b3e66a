use anyhow::{Context, Result};
use mb_state::{CacheConfig, RankingConfig};
use mb_vision::{
    CalibrationConfig, EnsembleConfig, FusionParams, LoaderConfig, RecognizerConfig,
    SceneThresholds, VotingConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Every tunable of a scan session. Missing JSON fields keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scene: SceneThresholds,
    pub calibration: CalibrationConfig,
    pub fusion: FusionParams,
    pub ensemble: EnsembleConfig,
    pub voting: VotingConfig,
    pub ranking: RankingConfig,
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
    pub recognizer: RecognizerConfig,
    /// Bound on decoding a screenshot
    pub decode_timeout_ms: u64,
    /// Look up a stored grid before calibrating from scratch
    pub use_presets: bool,
    /// Calibrations at least this confident are stored as presets
    pub preset_min_confidence: f64,
    /// Entity ids whose templates load before the rest
    pub priority_entities: Vec<String>,
    pub ranking_path: Option<PathBuf>,
    pub presets_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scene: SceneThresholds::default(),
            calibration: CalibrationConfig::default(),
            fusion: FusionParams::default(),
            ensemble: EnsembleConfig::default(),
            voting: VotingConfig::default(),
            ranking: RankingConfig::default(),
            cache: CacheConfig::default(),
            loader: LoaderConfig::default(),
            recognizer: RecognizerConfig::default(),
            decode_timeout_ms: mb_capture::DEFAULT_DECODE_TIMEOUT.as_millis() as u64,
            use_presets: true,
            preset_min_confidence: 0.8,
            priority_entities: Vec::new(),
            ranking_path: None,
            presets_path: None,
        }
    }
}

impl ScanConfig {
    /// Read a JSON config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded scan config from {}", path.display());
        Ok(config)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_vision::VotingMethod;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{
            "decode_timeout_ms": 5000,
            "voting": { "method": "median", "min_consensus": 0.6 },
            "calibration": { "max_rows": 1 }
        }"#;
        let config: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.decode_timeout(), Duration::from_millis(5000));
        assert_eq!(config.voting.method, VotingMethod::Median);
        assert_eq!(config.voting.min_consensus, 0.6);
        assert_eq!(config.voting.min_votes, VotingConfig::default().min_votes);
        assert_eq!(config.calibration.max_rows, 1);
        assert_eq!(config.calibration.min_edges, 3);
        assert_eq!(config.cache.max_entries, 50);
        assert!(config.use_presets);
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("megabonk_scan_no_such_config.json");
        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.decode_timeout_ms, 30_000);
        assert_eq!(config.ensemble.strategies.len(), EnsembleConfig::default().strategies.len());
    }
}
