use mb_vision::{FailureReason, Recognition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Counters for one scan session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cells_scanned: u64,
    pub empty_cells: u64,
    pub detections: u64,
    pub rejections: u64,
    pub errors: u64,
    pub rejections_by_reason: BTreeMap<String, u64>,
    pub last_duration_ms: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Single-writer collector; the session serializes access.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    current: MetricsSnapshot,
}

impl MetricsCollector {
    pub fn record_cache_hit(&mut self) {
        self.current.cache_hits += 1;
    }

    pub fn record_cache_miss(&mut self) {
        self.current.cache_misses += 1;
    }

    pub fn record_run(&mut self, recognition: &Recognition, elapsed: Duration) {
        let m = &mut self.current;
        m.runs += 1;
        m.cells_scanned += recognition.cells_scanned as u64;
        m.empty_cells += recognition.empty_cells as u64;
        m.detections += recognition.detections.len() as u64;
        m.last_duration_ms = elapsed.as_millis() as u64;
    }

    pub fn record_rejection(&mut self, reasons: &[FailureReason], elapsed: Duration) {
        let m = &mut self.current;
        m.runs += 1;
        m.rejections += 1;
        for reason in reasons {
            *m.rejections_by_reason.entry(reason.tag().to_string()).or_default() += 1;
        }
        m.last_duration_ms = elapsed.as_millis() as u64;
    }

    pub fn record_error(&mut self) {
        self.current.errors += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.current.clone()
    }

    pub fn reset(&mut self) {
        self.current = MetricsSnapshot::default();
    }

    pub fn summary(&self) -> String {
        let m = &self.current;
        let mut out = format!(
            "{} runs, {} detections over {} cells ({} empty), last run {} ms\n",
            m.runs, m.detections, m.cells_scanned, m.empty_cells, m.last_duration_ms
        );
        out.push_str(&format!(
            "cache {} hits / {} misses ({:.0}%), {} rejections, {} errors\n",
            m.cache_hits,
            m.cache_misses,
            m.cache_hit_rate() * 100.0,
            m.rejections,
            m.errors
        ));
        for (tag, count) in &m.rejections_by_reason {
            out.push_str(&format!("  {:<24} {}\n", tag, count));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_state::{DetectionMethod, DetectionResult};

    #[test]
    fn test_counts_runs_and_rejections() {
        let mut metrics = MetricsCollector::default();
        let recognition = Recognition {
            detections: vec![DetectionResult::new("a", 0.8, DetectionMethod::Hybrid)],
            cells_scanned: 3,
            empty_cells: 2,
            ..Default::default()
        };
        metrics.record_cache_miss();
        metrics.record_run(&recognition, Duration::from_millis(12));
        metrics.record_cache_hit();
        metrics.record_rejection(
            &[FailureReason::LikelyEmptyScreen, FailureReason::NoVerticalClusters],
            Duration::from_millis(4),
        );
        metrics.record_rejection(&[FailureReason::LikelyEmptyScreen], Duration::from_millis(3));

        let snap = metrics.snapshot();
        assert_eq!(snap.runs, 3);
        assert_eq!(snap.detections, 1);
        assert_eq!(snap.cells_scanned, 3);
        assert_eq!(snap.rejections, 2);
        assert_eq!(snap.rejections_by_reason["likely_empty_screen"], 2);
        assert_eq!(snap.last_duration_ms, 3);
        assert_eq!(snap.cache_hit_rate(), 0.5);
        assert!(metrics.summary().contains("likely_empty_screen"));

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
