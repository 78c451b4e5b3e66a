//! Weighted vote reducer shared by template matching and the ensemble.

use crate::similarity::SimilarityScores;
use mb_data::Rarity;
use mb_state::{clamp_confidence, TemplateWeights};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// One template's opinion about a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVote {
    pub template_id: String,
    pub entity_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub breakdown: Option<SimilarityScores>,
    #[serde(default)]
    pub rarity: Option<Rarity>,
}

impl TemplateVote {
    pub fn new(template_id: impl Into<String>, entity_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            template_id: template_id.into(),
            entity_id: entity_id.into(),
            confidence,
            breakdown: None,
            rarity: None,
        }
    }
}

/// Reduction over the votes for one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteAggregate {
    pub vote_count: usize,
    pub total_weight: f64,
    pub average_confidence: f64,
    pub max_confidence: f64,
    pub weighted_confidence: f64,
    pub median_confidence: f64,
    /// Borda points under ranked choice
    pub rank_points: f64,
    /// Highest-confidence template among the votes
    pub best_template: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    #[default]
    WeightedAverage,
    Max,
    Median,
    RankedChoice,
}

impl VotingMethod {
    pub fn name(self) -> &'static str {
        match self {
            VotingMethod::WeightedAverage => "weighted-average",
            VotingMethod::Max => "max",
            VotingMethod::Median => "median",
            VotingMethod::RankedChoice => "ranked-choice",
        }
    }

    fn score(self, agg: &VoteAggregate) -> f64 {
        match self {
            VotingMethod::WeightedAverage => agg.weighted_confidence,
            VotingMethod::Max => agg.max_confidence,
            VotingMethod::Median => agg.median_confidence,
            VotingMethod::RankedChoice => agg.rank_points,
        }
    }

    fn confidence(self, agg: &VoteAggregate) -> f64 {
        match self {
            VotingMethod::WeightedAverage | VotingMethod::RankedChoice => agg.weighted_confidence,
            VotingMethod::Max => agg.max_confidence,
            VotingMethod::Median => agg.median_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub method: VotingMethod,
    /// Winners with fewer votes are discarded
    pub min_votes: usize,
    /// Below this consensus the confidence is multiplied by the consensus
    pub min_consensus: f64,
    /// Pass/fail line for the final confidence
    pub confidence_threshold: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            method: VotingMethod::WeightedAverage,
            min_votes: 1,
            min_consensus: 0.5,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingResult {
    pub winner: String,
    pub confidence: f64,
    pub vote_count: usize,
    pub total_votes: usize,
    pub passed: bool,
    pub breakdown: BTreeMap<String, VoteAggregate>,
    pub consensus: f64,
    pub template_id: Option<String>,
    pub method: VotingMethod,
}

impl VotingResult {
    /// Winner's weighted confidence minus the best runner-up's
    pub fn margin(&self) -> f64 {
        let winner = self
            .breakdown
            .get(&self.winner)
            .map_or(self.confidence, |a| a.weighted_confidence);
        let runner_up = self
            .breakdown
            .iter()
            .filter(|(id, _)| **id != self.winner)
            .map(|(_, a)| a.weighted_confidence)
            .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))));
        match runner_up {
            Some(r) => winner - r,
            None => winner,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Group votes by entity and pick a winner.
///
/// Skipped templates do not vote. Returns `None` when nothing is left or
/// the winner has fewer than `min_votes` votes.
pub fn combine_votes(
    votes: &[TemplateVote],
    config: &VotingConfig,
    weights: &dyn TemplateWeights,
) -> Option<VotingResult> {
    let active: Vec<&TemplateVote> = votes
        .iter()
        .filter(|v| weights.should_use(&v.template_id))
        .collect();
    if active.is_empty() {
        return None;
    }
    let total_votes = active.len();

    // Borda count: the best vote overall earns n points, the worst 1
    let mut ranked: Vec<&TemplateVote> = active.clone();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut points: BTreeMap<&str, f64> = BTreeMap::new();
    for (rank, vote) in ranked.iter().enumerate() {
        *points.entry(vote.entity_id.as_str()).or_default() += (total_votes - rank) as f64;
    }

    let mut groups: BTreeMap<&str, Vec<&TemplateVote>> = BTreeMap::new();
    for vote in &active {
        groups.entry(vote.entity_id.as_str()).or_default().push(vote);
    }

    let breakdown: BTreeMap<String, VoteAggregate> = groups
        .into_iter()
        .map(|(entity, group)| {
            let mut total_weight = 0.0;
            let mut weighted_sum = 0.0;
            let mut sum = 0.0;
            let mut best: Option<&TemplateVote> = None;
            for vote in &group {
                let w = weights.weight(&vote.template_id);
                total_weight += w;
                weighted_sum += w * vote.confidence;
                sum += vote.confidence;
                if best.map_or(true, |b| vote.confidence > b.confidence) {
                    best = Some(vote);
                }
            }
            let count = group.len();
            let average = sum / count as f64;
            let mut confidences: Vec<f64> = group.iter().map(|v| v.confidence).collect();
            let agg = VoteAggregate {
                vote_count: count,
                total_weight,
                average_confidence: average,
                max_confidence: best.map_or(0.0, |b| b.confidence),
                weighted_confidence: if total_weight > 0.0 {
                    weighted_sum / total_weight
                } else {
                    average
                },
                median_confidence: median(&mut confidences),
                rank_points: points.get(entity).copied().unwrap_or(0.0),
                best_template: best.map(|b| b.template_id.clone()),
            };
            (entity.to_string(), agg)
        })
        .collect();

    // Ties: more votes, then more weight, then the smaller id
    let method = config.method;
    let (winner, agg) = breakdown.iter().max_by(|(ia, a), (ib, b)| {
        method
            .score(a)
            .total_cmp(&method.score(b))
            .then(a.vote_count.cmp(&b.vote_count))
            .then(a.total_weight.total_cmp(&b.total_weight))
            .then_with(|| ib.cmp(ia))
    })?;

    if agg.vote_count < config.min_votes {
        return None;
    }

    let consensus = agg.vote_count as f64 / total_votes as f64;
    let mut confidence = method.confidence(agg);
    if consensus < config.min_consensus {
        confidence *= consensus;
    }
    let confidence = clamp_confidence(confidence);

    Some(VotingResult {
        winner: winner.clone(),
        confidence,
        vote_count: agg.vote_count,
        total_votes,
        passed: confidence >= config.confidence_threshold,
        template_id: agg.best_template.clone(),
        breakdown: breakdown.clone(),
        consensus,
        method,
    })
}

pub fn describe_voting(config: &VotingConfig) -> String {
    format!(
        "voting: method={} min_votes={} min_consensus={:.2} threshold={:.2}",
        config.method.name(),
        config.min_votes,
        config.min_consensus,
        config.confidence_threshold
    )
}

pub fn describe_voting_result(result: &VotingResult) -> String {
    let mut out = format!(
        "{} {:.3} ({}) votes {}/{} consensus {:.2} margin {:+.3}",
        result.winner,
        result.confidence,
        if result.passed { "pass" } else { "fail" },
        result.vote_count,
        result.total_votes,
        result.consensus,
        result.margin()
    );
    let mut others: Vec<(&String, &VoteAggregate)> = result.breakdown.iter().collect();
    others.sort_by(|a, b| {
        b.1.weighted_confidence
            .partial_cmp(&a.1.weighted_confidence)
            .unwrap_or(Ordering::Equal)
    });
    for (id, agg) in others {
        let _ = write!(
            out,
            "\n  {}: {} votes, weighted {:.3}, max {:.3}",
            id, agg.vote_count, agg.weighted_confidence, agg.max_confidence
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_state::{NeutralWeights, RankingStore, VerifiedOutcome};

    fn votes(list: &[(&str, f64)]) -> Vec<TemplateVote> {
        list.iter()
            .enumerate()
            .map(|(i, (entity, c))| TemplateVote::new(format!("{}#{}", entity, i), *entity, *c))
            .collect()
    }

    #[test]
    fn test_weighted_average_majority() {
        let result = combine_votes(
            &votes(&[("A", 0.8), ("A", 0.7), ("B", 0.6)]),
            &VotingConfig::default(),
            &NeutralWeights,
        )
        .unwrap();
        assert_eq!(result.winner, "A");
        assert!((result.consensus - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.confidence - 0.75).abs() < 1e-9);
        assert_eq!(result.vote_count, 2);
        assert_eq!(result.total_votes, 3);
        assert!(result.vote_count <= result.total_votes);
        assert_eq!(result.template_id.as_deref(), Some("A#0"));
        assert!((result.margin() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_single_vote_passes_through() {
        let result =
            combine_votes(&votes(&[("A", 0.42)]), &VotingConfig::default(), &NeutralWeights).unwrap();
        assert_eq!(result.confidence, 0.42);
        assert_eq!(result.vote_count, 1);
        assert_eq!(result.consensus, 1.0);
        assert!(!result.passed);
    }

    #[test]
    fn test_min_votes_discards() {
        let config = VotingConfig {
            min_votes: 2,
            ..Default::default()
        };
        assert!(combine_votes(&votes(&[("A", 0.9), ("B", 0.8)]), &config, &NeutralWeights).is_none());
        assert!(combine_votes(&[], &VotingConfig::default(), &NeutralWeights).is_none());
    }

    #[test]
    fn test_low_consensus_penalized() {
        let result = combine_votes(
            &votes(&[("A", 0.9), ("B", 0.5), ("C", 0.4)]),
            &VotingConfig::default(),
            &NeutralWeights,
        )
        .unwrap();
        assert_eq!(result.winner, "A");
        assert!((result.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_methods() {
        let v = votes(&[("A", 0.95), ("B", 0.7), ("B", 0.7), ("B", 0.6)]);
        let pick = |method| {
            combine_votes(
                &v,
                &VotingConfig {
                    method,
                    ..Default::default()
                },
                &NeutralWeights,
            )
            .unwrap()
            .winner
        };
        assert_eq!(pick(VotingMethod::Max), "A");
        assert_eq!(pick(VotingMethod::WeightedAverage), "A");
        assert_eq!(pick(VotingMethod::Median), "A");
        // Borda: A=4, B=3+2+1
        assert_eq!(pick(VotingMethod::RankedChoice), "B");
    }

    #[test]
    fn test_tie_broken_by_count() {
        let result = combine_votes(
            &votes(&[("A", 0.8), ("B", 0.8), ("B", 0.8)]),
            &VotingConfig::default(),
            &NeutralWeights,
        )
        .unwrap();
        assert_eq!(result.winner, "B");
    }

    #[test]
    fn test_ranking_weights_and_skip_list() {
        let mut store = RankingStore::default();
        for _ in 0..12 {
            store.record(&VerifiedOutcome {
                template_id: "A#0".to_string(),
                detected_entity: "A".to_string(),
                actual_entity: "B".to_string(),
            });
        }
        assert!(!store.should_use_template("A#0"));
        let result = combine_votes(
            &votes(&[("A", 0.9), ("B", 0.6)]),
            &VotingConfig::default(),
            &store,
        )
        .unwrap();
        assert_eq!(result.winner, "B");
        assert_eq!(result.total_votes, 1);
    }

    #[test]
    fn test_descriptions() {
        let text = describe_voting(&VotingConfig::default());
        assert!(text.contains("weighted-average"));
        let result = combine_votes(
            &votes(&[("A", 0.8), ("B", 0.6)]),
            &VotingConfig::default(),
            &NeutralWeights,
        )
        .unwrap();
        let text = describe_voting_result(&result);
        assert!(text.starts_with("A "));
        assert!(text.contains("margin +0.200"));
        assert!(text.contains("\n  B: 1 votes"));
    }
}
