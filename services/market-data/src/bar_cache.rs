//! Incremental minute bar cache
//!
//! Stores 1-minute OHLCV bars per symbol keyed by timestamp. Merging is
//! idempotent: re-fetching a window replaces identical bars with themselves,
//! while a bar whose values changed for an existing timestamp is treated as
//! a late-arriving correction and overwrites the stored bar.
//!
//! Retention is measured back from the newest stored bar of each symbol, so
//! eviction never depends on the wall clock.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::bar::Bar;
use types::ids::Symbol;

use crate::config::CacheConfig;
use crate::series::{SymbolSeries, Timeframe};

/// Outcome of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Bars at timestamps not previously stored.
    pub inserted: usize,
    /// Bars that replaced a stored bar with different values.
    pub corrected: usize,
    /// Bars identical to the stored bar.
    pub unchanged: usize,
    /// Bars refused: wrong symbol, not minute-aligned, or OHLC-invalid.
    pub rejected: usize,
    /// Bars dropped by retention, stored or incoming.
    pub evicted: usize,
}

/// Per-symbol store of 1-minute bars.
#[derive(Debug, Default)]
pub struct MinuteBarCache {
    series: BTreeMap<Symbol, BTreeMap<NaiveDateTime, Bar>>,
    config: CacheConfig,
}

impl MinuteBarCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            series: BTreeMap::new(),
            config,
        }
    }

    /// Merge a batch and return the number of newly inserted bars.
    pub fn merge(&mut self, symbol: &Symbol, bars: impl IntoIterator<Item = Bar>) -> usize {
        self.merge_with_report(symbol, bars).inserted
    }

    /// Merge a batch and report what happened to every bar.
    pub fn merge_with_report(
        &mut self,
        symbol: &Symbol,
        bars: impl IntoIterator<Item = Bar>,
    ) -> MergeReport {
        let mut report = MergeReport::default();

        let mut accepted = Vec::new();
        for bar in bars {
            if bar.symbol != *symbol {
                warn!(
                    symbol = %symbol,
                    bar_symbol = %bar.symbol,
                    timestamp = %bar.timestamp,
                    "Rejecting bar for foreign symbol"
                );
                report.rejected += 1;
            } else if !bar.is_minute_aligned() {
                warn!(symbol = %symbol, timestamp = %bar.timestamp, "Rejecting misaligned bar");
                report.rejected += 1;
            } else if !bar.is_valid() {
                warn!(symbol = %symbol, timestamp = %bar.timestamp, "Rejecting OHLC-invalid bar");
                report.rejected += 1;
            } else {
                accepted.push(bar);
            }
        }

        let stored = self.series.entry(symbol.clone()).or_default();

        let newest = accepted
            .iter()
            .map(|b| b.timestamp)
            .chain(stored.keys().next_back().copied())
            .max();
        let cutoff = newest.map(|t| t - Duration::days(self.config.retention_days));

        for bar in accepted {
            if cutoff.is_some_and(|c| bar.timestamp < c) {
                report.evicted += 1;
                continue;
            }
            match stored.entry(bar.timestamp) {
                Entry::Vacant(slot) => {
                    slot.insert(bar);
                    report.inserted += 1;
                }
                Entry::Occupied(mut slot) => {
                    if *slot.get() == bar {
                        report.unchanged += 1;
                    } else {
                        let previous = slot.get();
                        warn!(
                            symbol = %symbol,
                            timestamp = %bar.timestamp,
                            old_close = %previous.close,
                            new_close = %bar.close,
                            old_volume = %previous.volume,
                            new_volume = %bar.volume,
                            "Late-arriving bar correction"
                        );
                        slot.insert(bar);
                        report.corrected += 1;
                    }
                }
            }
        }

        if let Some(cutoff) = cutoff {
            let kept = stored.split_off(&cutoff);
            report.evicted += stored.len();
            *stored = kept;
        }

        debug!(
            symbol = %symbol,
            inserted = report.inserted,
            corrected = report.corrected,
            unchanged = report.unchanged,
            rejected = report.rejected,
            evicted = report.evicted,
            stored = stored.len(),
            "Merged bar batch"
        );

        report
    }

    /// Stored 1-minute series; an unknown symbol yields an empty series.
    pub fn bars(&self, symbol: &Symbol) -> SymbolSeries {
        let bars = self
            .series
            .get(symbol)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        SymbolSeries::new(symbol.clone(), Timeframe::M1, bars)
    }

    /// Newest stored timestamp, used as the incremental fetch cursor.
    pub fn latest_timestamp(&self, symbol: &Symbol) -> Option<NaiveDateTime> {
        self.series
            .get(symbol)
            .and_then(|m| m.keys().next_back().copied())
    }

    /// Number of bars stored for `symbol`.
    pub fn len(&self, symbol: &Symbol) -> usize {
        self.series.get(symbol).map_or(0, BTreeMap::len)
    }

    /// Symbols with at least one stored bar.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.series
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(s, _)| s.clone())
            .collect()
    }
}
