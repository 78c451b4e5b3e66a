use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Read-only view of template performance used while voting.
pub trait TemplateWeights: Sync {
    /// Multiplier applied to a template's vote
    fn weight(&self, template_id: &str) -> f64;
    /// Whether the template may vote at all
    fn should_use(&self, template_id: &str) -> bool;
}

/// Every template weighs the same and none is skipped
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralWeights;

impl TemplateWeights for NeutralWeights {
    fn weight(&self, _template_id: &str) -> f64 {
        1.0
    }

    fn should_use(&self, _template_id: &str) -> bool {
        true
    }
}

/// Tuning for the performance weight and the skip-list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Success rate under which a template is skipped
    pub skip_floor: f64,
    /// Attempts needed before the skip floor applies
    pub min_samples: u32,
    pub base_weight: f64,
    pub success_weight: f64,
    /// Attempts that earn the full experience bonus are `experience_cap * experience_divisor`
    pub experience_divisor: f64,
    pub experience_cap: f64,
    pub confusion_penalty: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            skip_floor: 0.3,
            min_samples: 10,
            base_weight: 0.5,
            success_weight: 0.5,
            experience_divisor: 100.0,
            experience_cap: 0.2,
            confusion_penalty: 0.5,
            min_weight: 0.1,
            max_weight: 1.5,
        }
    }
}

/// Historical performance of one template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRanking {
    pub matches: u32,
    pub successes: u32,
    pub confusions: u32,
    pub success_rate: f64,
    pub confusion_rate: f64,
    pub skipped: bool,
}

/// An outcome that downstream verification has confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedOutcome {
    pub template_id: String,
    pub detected_entity: String,
    pub actual_entity: String,
}

impl VerifiedOutcome {
    pub fn is_success(&self) -> bool {
        self.detected_entity == self.actual_entity
    }
}

/// Per-template success/confusion bookkeeping plus the skip-list.
///
/// Only verified outcomes mutate it; the detection path reads it through
/// [`TemplateWeights`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingStore {
    #[serde(skip)]
    config: RankingConfig,
    rankings: HashMap<String, TemplateRanking>,
    skip_list: BTreeSet<String>,
}

impl RankingStore {
    pub fn new(config: RankingConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn record(&mut self, outcome: &VerifiedOutcome) {
        let config = &self.config;
        let entry = self
            .rankings
            .entry(outcome.template_id.clone())
            .or_default();

        entry.matches += 1;
        if outcome.is_success() {
            entry.successes += 1;
        } else {
            entry.confusions += 1;
        }
        entry.success_rate = entry.successes as f64 / entry.matches as f64;
        entry.confusion_rate = entry.confusions as f64 / entry.matches as f64;

        let should_skip =
            entry.matches >= config.min_samples && entry.success_rate < config.skip_floor;
        entry.skipped = should_skip;

        debug!(
            "Template {} ranking: {}/{} success, {} confusions",
            outcome.template_id, entry.successes, entry.matches, entry.confusions
        );

        if should_skip {
            if self.skip_list.insert(outcome.template_id.clone()) {
                info!(
                    "Template {} added to skip-list (success rate {:.2})",
                    outcome.template_id, entry.success_rate
                );
            }
        } else if self.skip_list.remove(&outcome.template_id) {
            info!(
                "Template {} removed from skip-list (success rate {:.2})",
                outcome.template_id, entry.success_rate
            );
        }
    }

    pub fn record_all<'a>(&mut self, outcomes: impl IntoIterator<Item = &'a VerifiedOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    /// Vote multiplier. Templates without history are neutral (1.0).
    pub fn performance_weight(&self, template_id: &str) -> f64 {
        let Some(r) = self.rankings.get(template_id) else {
            return 1.0;
        };
        let c = &self.config;
        let experience = (r.matches as f64 / c.experience_divisor).min(c.experience_cap);
        let weight = c.base_weight + c.success_weight * r.success_rate + experience
            - r.confusion_rate * c.confusion_penalty;
        weight.clamp(c.min_weight, c.max_weight)
    }

    pub fn should_use_template(&self, template_id: &str) -> bool {
        if self.skip_list.contains(template_id) {
            return false;
        }
        !self
            .rankings
            .get(template_id)
            .map_or(false, |r| r.skipped)
    }

    pub fn ranking(&self, template_id: &str) -> Option<&TemplateRanking> {
        self.rankings.get(template_id)
    }

    pub fn skip_list(&self) -> impl Iterator<Item = &str> {
        self.skip_list.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }

    pub fn load(path: &Path, config: RankingConfig) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(config));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut store: RankingStore =
            serde_json::from_str(&content).context("Failed to parse ranking data")?;
        store.config = config;
        info!(
            "Loaded rankings for {} templates ({} skipped)",
            store.rankings.len(),
            store.skip_list.len()
        );
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to encode rankings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Human-readable table of the worst performers
    pub fn summary(&self) -> String {
        let mut rows: Vec<(&String, &TemplateRanking)> = self.rankings.iter().collect();
        rows.sort_by(|a, b| {
            a.1.success_rate
                .total_cmp(&b.1.success_rate)
                .then_with(|| a.0.cmp(b.0))
        });

        let mut out = format!(
            "{} ranked templates, {} on skip-list\n",
            self.rankings.len(),
            self.skip_list.len()
        );
        for (id, r) in rows.iter().take(10) {
            out.push_str(&format!(
                "  {:<24} {:>4} tries  success {:.2}  confusion {:.2}  weight {:.2}{}\n",
                id,
                r.matches,
                r.success_rate,
                r.confusion_rate,
                self.performance_weight(id),
                if r.skipped { "  [skipped]" } else { "" }
            ));
        }
        out
    }
}

impl TemplateWeights for RankingStore {
    fn weight(&self, template_id: &str) -> f64 {
        self.performance_weight(template_id)
    }

    fn should_use(&self, template_id: &str) -> bool {
        self.should_use_template(template_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(template: &str, detected: &str, actual: &str) -> VerifiedOutcome {
        VerifiedOutcome {
            template_id: template.to_string(),
            detected_entity: detected.to_string(),
            actual_entity: actual.to_string(),
        }
    }

    #[test]
    fn test_unknown_template_is_neutral() {
        let store = RankingStore::default();
        assert_eq!(store.performance_weight("anything"), 1.0);
        assert!(store.should_use_template("anything"));
    }

    #[test]
    fn test_weight_formula() {
        let mut store = RankingStore::default();
        for _ in 0..8 {
            store.record(&outcome("t", "a", "a"));
        }
        for _ in 0..2 {
            store.record(&outcome("t", "a", "b"));
        }
        let r = store.ranking("t").unwrap();
        assert_eq!(r.matches, 10);
        assert!((r.success_rate - 0.8).abs() < 1e-12);
        assert!((r.confusion_rate - 0.2).abs() < 1e-12);
        // 0.5 + 0.4 + 0.1 - 0.1
        assert!((store.performance_weight("t") - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_weight_is_clamped() {
        let mut store = RankingStore::new(RankingConfig {
            confusion_penalty: 1.0,
            ..Default::default()
        });
        for _ in 0..50 {
            store.record(&outcome("bad", "a", "b"));
        }
        assert_eq!(store.performance_weight("bad"), 0.1);

        for _ in 0..200 {
            store.record(&outcome("good", "a", "a"));
        }
        // 0.5 + 0.5 + 0.2 stays under the ceiling
        assert!((store.performance_weight("good") - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_skip_list_needs_min_samples() {
        let mut store = RankingStore::default();
        for _ in 0..9 {
            store.record(&outcome("t", "a", "b"));
        }
        assert!(store.should_use_template("t"));
        store.record(&outcome("t", "a", "b"));
        assert!(!store.should_use_template("t"));
        assert_eq!(store.skip_list().collect::<Vec<_>>(), vec!["t"]);
    }

    #[test]
    fn test_template_recovers_from_skip_list() {
        let mut store = RankingStore::default();
        for _ in 0..10 {
            store.record(&outcome("t", "a", "b"));
        }
        assert!(!store.should_use_template("t"));
        for _ in 0..5 {
            store.record(&outcome("t", "a", "a"));
        }
        // 5/15 = 0.33 is above the floor again
        assert!(store.should_use_template("t"));
        assert_eq!(store.skip_list().count(), 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let mut store = RankingStore::default();
        store.record(&outcome("t", "a", "a"));
        let path = std::env::temp_dir().join(format!("mb_rankings_{}.json", std::process::id()));
        store.save(&path).unwrap();
        let loaded = RankingStore::load(&path, RankingConfig::default()).unwrap();
        assert_eq!(loaded.ranking("t"), store.ranking("t"));
        let _ = std::fs::remove_file(&path);
        assert!(store.summary().contains("1 ranked templates"));
    }
}
