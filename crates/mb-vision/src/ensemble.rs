//! Runs several detection strategies on one cell and fuses their opinions.

use crate::preprocess;
use crate::similarity::{fuse_weighted, Features, FusionParams};
use crate::strategy::DetectionStrategy;
use crate::templates::{Template, TemplateStore};
use crate::voting::{combine_votes, describe_voting, TemplateVote, VotingConfig, VotingResult};
use image::RgbaImage;
use mb_data::Rarity;
use mb_state::{clamp_confidence, NeutralWeights, TemplateWeights};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    /// Weighted vote reducer over every strategy's votes
    #[default]
    Voting,
    Max,
    Average,
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub strategies: Vec<DetectionStrategy>,
    /// Strategies that must agree before the winner keeps its full confidence
    pub min_agreement: usize,
    pub combine: CombineMethod,
    /// Sequential runs stop once a strategy is this sure
    pub early_exit_confidence: f64,
    pub parallel: bool,
    /// Vote multiplier when the cell frame and the template disagree on rarity
    pub rarity_mismatch_penalty: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                DetectionStrategy::default(),
                DetectionStrategy::high_precision(),
                DetectionStrategy::edge_focused(),
                DetectionStrategy::color_focused(),
            ],
            min_agreement: 2,
            combine: CombineMethod::Voting,
            early_exit_confidence: 0.95,
            parallel: true,
            rarity_mismatch_penalty: 0.85,
        }
    }
}

impl EnsembleConfig {
    /// A single strategy, no fusion
    pub fn single(strategy: DetectionStrategy) -> Self {
        Self {
            strategies: vec![strategy],
            min_agreement: 1,
            ..Default::default()
        }
    }
}

/// What one strategy concluded for a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDetection {
    pub strategy: String,
    pub weight: f64,
    pub entity_id: String,
    pub confidence: f64,
    pub template_id: Option<String>,
    pub votes: Vec<TemplateVote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleDecision {
    pub entity_id: String,
    pub confidence: f64,
    pub template_id: Option<String>,
    /// Strategy detections naming the winner
    pub agreeing: usize,
    /// Strategy detections for the cell
    pub total_detections: usize,
    pub strategies_run: usize,
    pub voting: Option<VotingResult>,
}

/// Read-only inputs shared by every strategy worker
pub struct Ensemble<'a> {
    pub config: &'a EnsembleConfig,
    pub voting: &'a VotingConfig,
    pub fusion: &'a FusionParams,
    pub templates: &'a TemplateStore,
    pub ranking: &'a dyn TemplateWeights,
}

impl<'a> Ensemble<'a> {
    /// Score one template against an already prepared cell.
    fn score(
        &self,
        strategy: &DetectionStrategy,
        cell: &Features,
        size: u32,
        template: &Template,
        rarity_hint: Option<Rarity>,
    ) -> Option<TemplateVote> {
        let features = template.variant(size)?;
        let scores = cell.compare(features);
        let mut confidence = fuse_weighted(&scores, strategy.metric_weights.as_ref(), self.fusion);
        if let Some(hint) = rarity_hint {
            if hint != template.rarity {
                confidence *= self.config.rarity_mismatch_penalty;
            }
        }
        if confidence < strategy.min_confidence {
            return None;
        }
        Some(TemplateVote {
            template_id: template.template_id.clone(),
            entity_id: template.entity_id.clone(),
            confidence,
            breakdown: Some(scores),
            rarity: Some(template.rarity),
        })
    }

    /// Top votes of one strategy, best first
    pub fn strategy_votes(
        &self,
        strategy: &DetectionStrategy,
        cell: &RgbaImage,
        rarity_hint: Option<Rarity>,
    ) -> Vec<TemplateVote> {
        if cell.width() == 0 || cell.height() == 0 || self.templates.is_empty() {
            return Vec::new();
        }
        let conditioned = match &strategy.preprocess {
            Some(cfg) => preprocess::apply(cell, &cfg.clone().clamped()),
            None => cell.clone(),
        };
        let size = self.templates.nearest_size(cell.width().max(cell.height()));
        let resized = image::imageops::resize(
            &conditioned,
            size,
            size,
            image::imageops::FilterType::Triangle,
        );
        let features = Features::from_image(&resized);

        let mut votes = Vec::new();
        for entity in self.templates.entities() {
            let mut candidates: Vec<&Template> = self
                .templates
                .templates_for(entity)
                .filter(|t| !strategy.use_ranking || self.ranking.should_use(&t.template_id))
                .collect();
            if strategy.use_ranking {
                candidates.sort_by(|a, b| {
                    self.ranking
                        .weight(&b.template_id)
                        .total_cmp(&self.ranking.weight(&a.template_id))
                });
            }
            votes.extend(
                candidates
                    .into_iter()
                    .take(strategy.max_templates_per_candidate.max(1))
                    .filter_map(|t| self.score(strategy, &features, size, t, rarity_hint)),
            );
        }
        votes.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        if let Some(best) = votes.first().map(|v| v.confidence) {
            votes.retain(|v| v.confidence >= best - strategy.vote_margin);
        }
        votes.truncate(strategy.max_votes.max(1));
        votes
    }

    fn run_strategy(
        &self,
        strategy: &DetectionStrategy,
        cell: &RgbaImage,
        rarity_hint: Option<Rarity>,
    ) -> Option<StrategyDetection> {
        let votes = self.strategy_votes(strategy, cell, rarity_hint);
        let weights: &dyn TemplateWeights = if strategy.use_ranking {
            self.ranking
        } else {
            &NeutralWeights
        };
        let result = combine_votes(&votes, self.voting, weights)?;
        Some(StrategyDetection {
            strategy: strategy.name.clone(),
            weight: strategy.weight,
            entity_id: result.winner,
            confidence: result.confidence,
            template_id: result.template_id,
            votes,
        })
    }

    fn run_all(&self, cell: &RgbaImage, rarity_hint: Option<Rarity>) -> (Vec<StrategyDetection>, usize) {
        let strategies = &self.config.strategies;
        if self.config.parallel {
            let detections = strategies
                .par_iter()
                .filter_map(|s| self.run_strategy(s, cell, rarity_hint))
                .collect();
            return (detections, strategies.len());
        }

        let mut detections = Vec::new();
        let mut run = 0;
        for strategy in strategies {
            run += 1;
            if let Some(detection) = self.run_strategy(strategy, cell, rarity_hint) {
                let done = detection.confidence >= self.config.early_exit_confidence;
                detections.push(detection);
                if done {
                    debug!("Early exit after strategy '{}'", strategy.name);
                    break;
                }
            }
        }
        (detections, run)
    }

    /// Decide which entity a cell shows, if any strategy found one.
    pub fn evaluate(&self, cell: &RgbaImage, rarity_hint: Option<Rarity>) -> Option<EnsembleDecision> {
        let (detections, strategies_run) = self.run_all(cell, rarity_hint);
        if detections.is_empty() {
            return None;
        }

        let (entity_id, confidence, template_id, voting) = match self.config.combine {
            CombineMethod::Voting => {
                let votes: Vec<TemplateVote> = detections
                    .iter()
                    .flat_map(|d| {
                        d.votes.iter().map(move |v| TemplateVote {
                            confidence: v.confidence * d.weight,
                            ..v.clone()
                        })
                    })
                    .collect();
                let result = combine_votes(&votes, self.voting, self.ranking)?;
                (
                    result.winner.clone(),
                    result.confidence,
                    result.template_id.clone(),
                    Some(result),
                )
            }
            CombineMethod::Max => {
                let best = detections
                    .iter()
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
                (best.entity_id.clone(), best.confidence, best.template_id.clone(), None)
            }
            CombineMethod::Average | CombineMethod::Weighted => {
                let weighted = self.config.combine == CombineMethod::Weighted;
                // entity -> (sum, weight)
                let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
                for d in &detections {
                    let w = if weighted { d.weight.max(0.0) } else { 1.0 };
                    let entry = totals.entry(d.entity_id.as_str()).or_default();
                    entry.0 += d.confidence * w;
                    entry.1 += w;
                }
                let (entity, score) = totals
                    .into_iter()
                    .map(|(e, (sum, w))| (e, if w > 0.0 { sum / w } else { 0.0 }))
                    .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)))?;
                let template = detections
                    .iter()
                    .filter(|d| d.entity_id == entity)
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                    .and_then(|d| d.template_id.clone());
                (entity.to_string(), score, template, None)
            }
        };

        let agreeing = detections.iter().filter(|d| d.entity_id == entity_id).count();
        let total = detections.len();
        let mut confidence = confidence;
        if agreeing < self.config.min_agreement {
            confidence *= agreeing as f64 / total as f64;
        }

        Some(EnsembleDecision {
            entity_id,
            confidence: clamp_confidence(confidence),
            template_id,
            agreeing,
            total_detections: total,
            strategies_run,
            voting,
        })
    }
}

pub fn describe_ensemble(config: &EnsembleConfig, voting: &VotingConfig) -> String {
    let mut out = format!(
        "ensemble: combine={:?} min_agreement={} early_exit={:.2} {} rarity_penalty={:.2}",
        config.combine,
        config.min_agreement,
        config.early_exit_confidence,
        if config.parallel { "parallel" } else { "sequential" },
        config.rarity_mismatch_penalty
    );
    for s in &config.strategies {
        let _ = write!(
            out,
            "\n  {} (weight {:.2}): min {:.2}, {} templates/candidate, {} votes, ranking {}{}",
            s.name,
            s.weight,
            s.min_confidence,
            s.max_templates_per_candidate,
            s.max_votes,
            if s.use_ranking { "on" } else { "off" },
            match &s.metric_weights {
                Some(w) => format!(
                    ", metrics ncc {:.1} ssim {:.1} hist {:.1} edge {:.1}",
                    w.ncc, w.ssim, w.histogram, w.edge
                ),
                None => String::new(),
            }
        );
    }
    let _ = write!(out, "\n{}", describe_voting(voting));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// 0: red ramp, 1: green/yellow checkerboard, 2: blue noise
    fn icon(seed: u32) -> RgbaImage {
        RgbaImage::from_fn(48, 48, |x, y| match seed {
            0 => {
                let v = ((x * 5 + y * 2) % 256) as u8;
                Rgba([v, v / 3, 40, 255])
            }
            1 => {
                if (x / 5 + y / 5) % 2 == 0 {
                    Rgba([30, 200, 60, 255])
                } else {
                    Rgba([220, 220, 30, 255])
                }
            }
            _ => {
                let v = ((x * y * 7 + 13) % 256) as u8;
                Rgba([40, v / 2, v, 255])
            }
        })
    }

    fn store() -> TemplateStore {
        let mut store = TemplateStore::default();
        store.insert("ramp", "ramp", Rarity::Rare, &icon(0));
        store.insert("checker", "checker", Rarity::Epic, &icon(1));
        store.insert("noise", "noise", Rarity::Common, &icon(2));
        store
    }

    fn ensemble<'a>(
        config: &'a EnsembleConfig,
        voting: &'a VotingConfig,
        fusion: &'a FusionParams,
        templates: &'a TemplateStore,
    ) -> Ensemble<'a> {
        Ensemble {
            config,
            voting,
            fusion,
            templates,
            ranking: &NeutralWeights,
        }
    }

    #[test]
    fn test_recognizes_known_icon() {
        let templates = store();
        let config = EnsembleConfig::default();
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        let e = ensemble(&config, &voting, &fusion, &templates);

        let decision = e.evaluate(&icon(1), None).unwrap();
        assert_eq!(decision.entity_id, "checker");
        assert_eq!(decision.template_id.as_deref(), Some("checker"));
        assert!(decision.confidence > 0.8);
        assert_eq!(decision.strategies_run, 4);
        assert_eq!(decision.agreeing, decision.total_detections);
    }

    #[test]
    fn test_all_combine_methods_agree_on_clear_match() {
        let templates = store();
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        for combine in [
            CombineMethod::Voting,
            CombineMethod::Max,
            CombineMethod::Average,
            CombineMethod::Weighted,
        ] {
            let config = EnsembleConfig {
                combine,
                parallel: false,
                early_exit_confidence: 1.0,
                ..Default::default()
            };
            let e = ensemble(&config, &voting, &fusion, &templates);
            let decision = e.evaluate(&icon(0), None).unwrap();
            assert_eq!(decision.entity_id, "ramp", "{:?}", combine);
        }
    }

    #[test]
    fn test_sequential_early_exit() {
        let templates = store();
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        let config = EnsembleConfig {
            parallel: false,
            early_exit_confidence: 0.5,
            ..Default::default()
        };
        let e = ensemble(&config, &voting, &fusion, &templates);
        let decision = e.evaluate(&icon(1), None).unwrap();
        assert_eq!(decision.strategies_run, 1);
        // One detection is below the agreement floor but all of them agree
        assert_eq!(decision.agreeing, 1);
        assert_eq!(decision.total_detections, 1);
    }

    /// Skips one template for strategies that honour ranking
    struct Retired(&'static str);

    impl TemplateWeights for Retired {
        fn weight(&self, _template_id: &str) -> f64 {
            1.0
        }

        fn should_use(&self, template_id: &str) -> bool {
            template_id != self.0
        }
    }

    #[test]
    fn test_disagreement_scales_confidence() {
        let templates = store();
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        let unranked = DetectionStrategy {
            name: "unranked".to_string(),
            use_ranking: false,
            ..Default::default()
        };
        let ranked = DetectionStrategy {
            name: "ranked".to_string(),
            min_confidence: 0.0,
            vote_margin: 1.0,
            ..Default::default()
        };

        let alone = EnsembleConfig {
            combine: CombineMethod::Max,
            ..EnsembleConfig::single(unranked.clone())
        };
        let solo = ensemble(&alone, &voting, &fusion, &templates)
            .evaluate(&icon(1), None)
            .unwrap();
        assert_eq!(solo.entity_id, "checker");

        let config = EnsembleConfig {
            strategies: vec![ranked, unranked],
            min_agreement: 2,
            combine: CombineMethod::Max,
            early_exit_confidence: 2.0,
            parallel: false,
            ..Default::default()
        };
        let retired = Retired("checker");
        let e = Ensemble {
            ranking: &retired,
            ..ensemble(&config, &voting, &fusion, &templates)
        };
        let decision = e.evaluate(&icon(1), None).unwrap();
        assert_eq!(decision.entity_id, "checker");
        assert_eq!(decision.agreeing, 1);
        assert_eq!(decision.total_detections, 2);
        assert!((decision.confidence - solo.confidence * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rarity_mismatch_lowers_votes() {
        let templates = store();
        let config = EnsembleConfig::single(DetectionStrategy::default());
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        let e = ensemble(&config, &voting, &fusion, &templates);
        let strategy = DetectionStrategy::default();

        let matching = e.strategy_votes(&strategy, &icon(1), Some(Rarity::Epic));
        let mismatched = e.strategy_votes(&strategy, &icon(1), Some(Rarity::Legendary));
        let top = |votes: &[TemplateVote]| {
            votes
                .iter()
                .find(|v| v.entity_id == "checker")
                .map(|v| v.confidence)
                .unwrap()
        };
        assert!((top(&mismatched) - top(&matching) * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_no_templates_no_decision() {
        let templates = TemplateStore::default();
        let config = EnsembleConfig::default();
        let (voting, fusion) = (VotingConfig::default(), FusionParams::default());
        let e = ensemble(&config, &voting, &fusion, &templates);
        assert!(e.evaluate(&icon(0), None).is_none());
    }

    #[test]
    fn test_describe_ensemble() {
        let text = describe_ensemble(&EnsembleConfig::default(), &VotingConfig::default());
        assert!(text.contains("combine=Voting"));
        assert!(text.contains("high_precision (weight 1.20)"));
        assert!(text.ends_with("threshold=0.50"));
    }
}
