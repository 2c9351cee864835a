//! Process counters for the analytics pipeline
//!
//! Lock-free counters for bar merges and stream reconciliation plus a
//! bounded latency window for indicator passes. Exported as a sorted map
//! for Prometheus-style exposition by the host.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::bar_cache::MergeReport;

/// Counters shared by every component of one `MarketContext`.
pub struct AnalyticsMetrics {
    // Bar cache
    pub bars_inserted: AtomicU64,
    pub bars_corrected: AtomicU64,
    pub bars_rejected: AtomicU64,
    pub bars_evicted: AtomicU64,
    pub fetch_failures: AtomicU64,

    // Stream reconciliation
    pub updates_merged: AtomicU64,
    pub updates_quarantined: AtomicU64,
    pub updates_rejected: AtomicU64,
    pub stale_fields_skipped: AtomicU64,
    pub stream_reconnects: AtomicU64,

    // Computation
    pub indicator_passes: AtomicU64,
    pub indicator_pass_ns: Mutex<LatencyTracker>,
}

impl AnalyticsMetrics {
    pub fn new() -> Self {
        Self {
            bars_inserted: AtomicU64::new(0),
            bars_corrected: AtomicU64::new(0),
            bars_rejected: AtomicU64::new(0),
            bars_evicted: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            updates_merged: AtomicU64::new(0),
            updates_quarantined: AtomicU64::new(0),
            updates_rejected: AtomicU64::new(0),
            stale_fields_skipped: AtomicU64::new(0),
            stream_reconnects: AtomicU64::new(0),
            indicator_passes: AtomicU64::new(0),
            indicator_pass_ns: Mutex::new(LatencyTracker::new(512)),
        }
    }

    /// Fold one merge report into the bar counters.
    pub fn record_merge(&self, report: &MergeReport) {
        self.bars_inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.bars_corrected
            .fetch_add(report.corrected as u64, Ordering::Relaxed);
        self.bars_rejected
            .fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.bars_evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_merged(&self, stale_fields: usize) {
        self.updates_merged.fetch_add(1, Ordering::Relaxed);
        self.stale_fields_skipped
            .fetch_add(stale_fields as u64, Ordering::Relaxed);
    }

    pub fn record_update_quarantined(&self) {
        self.updates_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_rejected(&self) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.stream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one indicator pass and how long it took.
    pub fn record_indicator_pass(&self, elapsed_ns: u64) {
        self.indicator_passes.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.indicator_pass_ns.lock() {
            tracker.record(elapsed_ns);
        }
    }

    /// p99 indicator pass latency, if any pass has run.
    pub fn indicator_pass_p99_ns(&self) -> Option<u64> {
        self.indicator_pass_ns
            .lock()
            .ok()
            .and_then(|tracker| tracker.percentile(99))
    }

    /// Export counters as a sorted map.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("bars_inserted", &self.bars_inserted),
            ("bars_corrected", &self.bars_corrected),
            ("bars_rejected", &self.bars_rejected),
            ("bars_evicted", &self.bars_evicted),
            ("fetch_failures", &self.fetch_failures),
            ("updates_merged", &self.updates_merged),
            ("updates_quarantined", &self.updates_quarantined),
            ("updates_rejected", &self.updates_rejected),
            ("stale_fields_skipped", &self.stale_fields_skipped),
            ("stream_reconnects", &self.stream_reconnects),
            ("indicator_passes", &self.indicator_passes),
        ];
        counters
            .into_iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for AnalyticsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of latency samples for percentile queries.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100) over the current window.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_report_folds_into_counters() {
        let metrics = AnalyticsMetrics::new();
        metrics.record_merge(&MergeReport {
            inserted: 10,
            corrected: 2,
            unchanged: 5,
            rejected: 1,
            evicted: 3,
        });

        let exported = metrics.export();
        assert_eq!(exported["bars_inserted"], 10);
        assert_eq!(exported["bars_corrected"], 2);
        assert_eq!(exported["bars_rejected"], 1);
        assert_eq!(exported["bars_evicted"], 3);
    }

    #[test]
    fn test_stream_counters() {
        let metrics = AnalyticsMetrics::new();
        metrics.record_update_merged(2);
        metrics.record_update_merged(0);
        metrics.record_update_quarantined();
        metrics.record_update_rejected();
        metrics.record_reconnect();

        let exported = metrics.export();
        assert_eq!(exported["updates_merged"], 2);
        assert_eq!(exported["stale_fields_skipped"], 2);
        assert_eq!(exported["updates_quarantined"], 1);
        assert_eq!(exported["updates_rejected"], 1);
        assert_eq!(exported["stream_reconnects"], 1);
    }

    #[test]
    fn test_indicator_latency() {
        let metrics = AnalyticsMetrics::new();
        assert!(metrics.indicator_pass_p99_ns().is_none());
        for ns in 1..=100 {
            metrics.record_indicator_pass(ns);
        }
        let p99 = metrics.indicator_pass_p99_ns().unwrap();
        assert!((98..=100).contains(&p99));
        assert_eq!(metrics.export()["indicator_passes"], 100);
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);
        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40);

        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.percentile(0), Some(20));
        assert_eq!(tracker.percentile(100), Some(40));
    }
}
