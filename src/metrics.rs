//! Projection recompute latency.
//! The view records one sample per full recompute; runners read percentiles.

use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Percentile summary in microseconds. `None` until the first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub samples: u64,
}

pub struct RecomputeStats {
    histogram: Histogram<u64>,
}

impl RecomputeStats {
    /// Tracks 1us to 60s, 3 significant figures.
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("valid histogram bounds");
        Self { histogram }
    }

    pub fn record(&mut self, d: Duration) {
        let us = d.as_micros().clamp(1, 60_000_000) as u64;
        let _ = self.histogram.record(us);
    }

    pub fn summary(&self) -> LatencySummary {
        let h = &self.histogram;
        if h.len() == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
            samples: h.len(),
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }
}

impl Default for RecomputeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecomputeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecomputeStats")
            .field("samples", &self.histogram.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_has_no_percentiles() {
        let stats = RecomputeStats::new();
        assert!(stats.is_empty());
        assert_eq!(stats.summary(), LatencySummary::default());
    }

    #[test]
    fn percentiles_follow_samples() {
        let mut stats = RecomputeStats::new();
        for us in 1..=100u64 {
            stats.record(Duration::from_micros(us));
        }
        let s = stats.summary();
        assert_eq!(s.samples, 100);
        let p50 = s.p50_us.unwrap();
        let p99 = s.p99_us.unwrap();
        assert!((49..=51).contains(&p50), "p50={p50}");
        assert!((98..=100).contains(&p99), "p99={p99}");
        // Sub-microsecond recomputes still count.
        stats.record(Duration::from_nanos(10));
        assert_eq!(stats.len(), 101);
    }
}
