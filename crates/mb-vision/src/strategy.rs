use crate::preprocess::PreprocessConfig;
use crate::similarity::MetricWeights;
use serde::{Deserialize, Serialize};

/// A named detection policy: one opinion in the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionStrategy {
    pub name: String,
    /// Multiplier on this strategy's votes when the ensemble combines them
    pub weight: f64,
    /// Applied to the cell on top of scene conditioning; `None` keeps the
    /// scene-derived config
    pub preprocess: Option<PreprocessConfig>,
    pub metric_weights: Option<MetricWeights>,
    /// Template scores below this do not vote
    pub min_confidence: f64,
    /// Votes further than this below the strategy's best score are dropped
    pub vote_margin: f64,
    /// Templates compared per candidate entity
    pub max_templates_per_candidate: usize,
    pub use_ranking: bool,
    /// Best-scoring votes kept per cell
    pub max_votes: usize,
}

impl Default for DetectionStrategy {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            weight: 1.0,
            preprocess: None,
            metric_weights: None,
            min_confidence: 0.6,
            vote_margin: 0.1,
            max_templates_per_candidate: 2,
            use_ranking: true,
            max_votes: 5,
        }
    }
}

impl DetectionStrategy {
    /// Leans on structure and demands a higher score
    pub fn high_precision() -> Self {
        Self {
            name: "high_precision".to_string(),
            weight: 1.2,
            metric_weights: Some(MetricWeights {
                ncc: 1.0,
                ssim: 2.0,
                histogram: 0.5,
                edge: 1.0,
            }),
            min_confidence: 0.7,
            vote_margin: 0.05,
            max_templates_per_candidate: 1,
            max_votes: 3,
            ..Default::default()
        }
    }

    /// Looser floor, more templates per candidate
    pub fn high_recall() -> Self {
        Self {
            name: "high_recall".to_string(),
            weight: 0.8,
            min_confidence: 0.5,
            vote_margin: 0.2,
            max_templates_per_candidate: 4,
            max_votes: 8,
            ..Default::default()
        }
    }

    pub fn edge_focused() -> Self {
        Self {
            name: "edge_focused".to_string(),
            weight: 0.9,
            preprocess: Some(PreprocessConfig {
                contrast_factor: 1.4,
                sharpening_factor: 0.5,
                ..Default::default()
            }),
            metric_weights: Some(MetricWeights {
                ncc: 1.0,
                ssim: 0.5,
                histogram: 0.25,
                edge: 2.5,
            }),
            ..Default::default()
        }
    }

    pub fn color_focused() -> Self {
        Self {
            name: "color_focused".to_string(),
            weight: 0.9,
            preprocess: Some(PreprocessConfig {
                normalize_colors: true,
                reduce_noise: true,
                ..Default::default()
            }),
            metric_weights: Some(MetricWeights {
                ncc: 0.5,
                ssim: 0.5,
                histogram: 2.5,
                edge: 0.25,
            }),
            ..Default::default()
        }
    }

    pub fn presets() -> Vec<Self> {
        vec![
            Self::default(),
            Self::high_precision(),
            Self::high_recall(),
            Self::edge_focused(),
            Self::color_focused(),
        ]
    }

    pub fn by_name(name: &str) -> Option<Self> {
        Self::presets().into_iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_have_unique_names() {
        let presets = DetectionStrategy::presets();
        let mut names: Vec<&str> = presets.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), presets.len());
        assert_eq!(
            DetectionStrategy::by_name("edge_focused").unwrap().metric_weights.unwrap().edge,
            2.5
        );
        assert!(DetectionStrategy::by_name("nope").is_none());
    }

    #[test]
    fn test_precision_is_stricter_than_recall() {
        let p = DetectionStrategy::high_precision();
        let r = DetectionStrategy::high_recall();
        assert!(p.min_confidence > r.min_confidence);
        assert!(p.max_templates_per_candidate < r.max_templates_per_candidate);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let s: DetectionStrategy = serde_json::from_str(r#"{"name":"custom","weight":2.0}"#).unwrap();
        assert_eq!(s.name, "custom");
        assert_eq!(s.max_votes, 5);
        assert!(s.use_ranking);
    }
}
