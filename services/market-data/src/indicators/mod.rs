//! Technical indicator engine
//!
//! Every indicator is an incremental state machine fed one bar at a time,
//! which makes the no-lookahead property structural: the value at index `t`
//! is produced before bar `t + 1` is ever seen.
//!
//! Warm-up is explicit. A numeric indicator yields `None` until its window
//! is satisfied and `Some(value)` afterwards; nothing is coerced into a
//! default-looking number. Pattern flags are sparse (fair value gaps) or
//! boolean per timestamp from the second bar on (engulfing).

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod momentum;
pub mod patterns;
pub mod rsi;

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use types::bar::Bar;
use types::ids::Symbol;
use types::numeric::to_f64;

use crate::config::IndicatorConfig;
use crate::series::{SymbolSeries, Timeframe};

pub use patterns::{FairValueGap, GapDirection};

pub const RSI: &str = "rsi";
pub const MACD: &str = "macd";
pub const MACD_SIGNAL: &str = "macd_signal";
pub const MACD_HISTOGRAM: &str = "macd_histogram";
pub const BB_UPPER: &str = "bb_upper";
pub const BB_MIDDLE: &str = "bb_middle";
pub const BB_LOWER: &str = "bb_lower";
pub const IMI: &str = "imi";
pub const MFI: &str = "mfi";
pub const EMA_FAST: &str = "ema_fast";
pub const EMA_SLOW: &str = "ema_slow";
pub const SMA_SLOW: &str = "sma_slow";
pub const BULLISH_ENGULFING: &str = "bullish_engulfing";
pub const BEARISH_ENGULFING: &str = "bearish_engulfing";

/// Fixed-capacity rolling window over `f64` samples.
#[derive(Debug, Clone)]
pub struct RingBuf {
    buf: VecDeque<f64>,
    cap: usize,
}

impl RingBuf {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn full(&self) -> bool {
        self.buf.len() == self.cap
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.buf.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.sum() / self.buf.len() as f64
    }

    /// Population standard deviation (ddof = 0).
    pub fn std_pop(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.buf.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.buf.len() as f64;
        var.sqrt()
    }
}

/// One per-timestamp value; `None` means undefined, not zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint<T = f64> {
    pub timestamp: NaiveDateTime,
    pub value: Option<T>,
}

/// Output of one indicator over one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult<T = f64> {
    pub timeframe: Timeframe,
    pub name: String,
    pub points: Vec<IndicatorPoint<T>>,
}

impl<T: Copy> IndicatorResult<T> {
    /// Pair computed values with bar timestamps.
    pub fn from_values(timeframe: Timeframe, name: &str, bars: &[Bar], values: Vec<Option<T>>) -> Self {
        let points = bars
            .iter()
            .zip(values)
            .map(|(bar, value)| IndicatorPoint {
                timestamp: bar.timestamp,
                value,
            })
            .collect();
        Self {
            timeframe,
            name: name.to_string(),
            points,
        }
    }

    /// Value at the last timestamp.
    pub fn latest(&self) -> Option<T> {
        self.points.last().and_then(|p| p.value)
    }

    /// Value `back` steps before the last timestamp.
    pub fn nth_back(&self, back: usize) -> Option<T> {
        let len = self.points.len();
        if back >= len {
            return None;
        }
        self.points[len - 1 - back].value
    }

    pub fn defined_count(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Every indicator for one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Bars fed through the indicators.
    pub bars_used: usize,
    /// A trailing partial bucket was left out.
    pub partial_excluded: bool,
    pub last_close: Option<f64>,
    pub values: BTreeMap<String, IndicatorResult>,
    pub patterns: BTreeMap<String, IndicatorResult<bool>>,
    pub fair_value_gaps: Vec<FairValueGap>,
}

impl IndicatorSet {
    pub fn result(&self, name: &str) -> Option<&IndicatorResult> {
        self.values.get(name)
    }

    /// Latest value of a numeric indicator.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(IndicatorResult::latest)
    }

    /// Latest flag of a boolean pattern.
    pub fn latest_pattern(&self, name: &str) -> Option<bool> {
        self.patterns.get(name).and_then(IndicatorResult::latest)
    }

    pub fn is_empty(&self) -> bool {
        self.bars_used == 0
    }
}

/// Computes the full indicator set for a series.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn compute(&self, series: &SymbolSeries) -> IndicatorSet {
        let started = Instant::now();
        let cfg = &self.config;
        let partial_excluded = cfg.exclude_partial && series.partial_last && !series.is_empty();
        let bars = if partial_excluded {
            series.closed_bars()
        } else {
            &series.bars[..]
        };
        let tf = series.timeframe;
        let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();

        let mut values = BTreeMap::new();
        let mut put = |name: &str, series_values: Vec<Option<f64>>| {
            values.insert(
                name.to_string(),
                IndicatorResult::from_values(tf, name, bars, series_values),
            );
        };

        put(RSI, rsi::rsi(&closes, cfg.rsi_period));

        let macd_out = macd::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        put(MACD, macd_out.iter().map(|m| m.macd).collect());
        put(MACD_SIGNAL, macd_out.iter().map(|m| m.signal).collect());
        put(MACD_HISTOGRAM, macd_out.iter().map(|m| m.histogram).collect());

        let bands = bollinger::bollinger(&closes, cfg.bollinger_window, cfg.bollinger_k);
        put(BB_UPPER, bands.iter().map(|b| b.map(|b| b.upper)).collect());
        put(BB_MIDDLE, bands.iter().map(|b| b.map(|b| b.middle)).collect());
        put(BB_LOWER, bands.iter().map(|b| b.map(|b| b.lower)).collect());

        put(IMI, momentum::imi(bars, cfg.imi_period));
        put(MFI, momentum::mfi(bars, cfg.mfi_period));
        put(EMA_FAST, ema::ema(&closes, cfg.ema_fast));
        put(EMA_SLOW, ema::ema(&closes, cfg.ema_slow));
        put(SMA_SLOW, ema::sma(&closes, cfg.ema_slow));

        let (bullish, bearish) = patterns::engulfing(bars);
        let mut pattern_results = BTreeMap::new();
        pattern_results.insert(
            BULLISH_ENGULFING.to_string(),
            IndicatorResult::from_values(tf, BULLISH_ENGULFING, bars, bullish),
        );
        pattern_results.insert(
            BEARISH_ENGULFING.to_string(),
            IndicatorResult::from_values(tf, BEARISH_ENGULFING, bars, bearish),
        );

        let set = IndicatorSet {
            symbol: series.symbol.clone(),
            timeframe: tf,
            bars_used: bars.len(),
            partial_excluded,
            last_close: closes.last().copied(),
            values,
            patterns: pattern_results,
            fair_value_gaps: patterns::fair_value_gaps(bars),
        };

        tracing::debug!(
            symbol = %series.symbol,
            timeframe = %tf,
            bars = set.bars_used,
            partial_excluded,
            gaps = set.fair_value_gaps.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Computed indicator set"
        );

        set
    }
}
