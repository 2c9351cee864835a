//! Multi-timeframe market bias
//!
//! Folds the latest indicator values of several timeframes into one score in
//! [-100, 100]. Each timeframe is scored from the components it has data
//! for; timeframes are then combined by weight, longer timeframes counting
//! more.
//!
//! `quality` separates a computed neutral from a fallback: a score of 0 with
//! `InsufficientData` means nothing could be computed, while 0 with
//! `Computed` is a genuine balance of signals.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{self, GapDirection, IndicatorSet};
use crate::series::Timeframe;

/// Components a timeframe needs before it contributes to the score.
pub const MIN_COMPONENTS: usize = 3;

/// A fair value gap counts as a live signal for this many bars.
pub const FVG_LOOKBACK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasQuality {
    /// Every supplied timeframe contributed.
    Computed,
    /// Some timeframes lacked data; the score uses the rest.
    Partial,
    /// No timeframe had enough data; the score is a placeholder.
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasLabel {
    StrongBearish,
    Bearish,
    Neutral,
    Bullish,
    StrongBullish,
}

impl BiasLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 50.0 {
            BiasLabel::StrongBullish
        } else if score >= 15.0 {
            BiasLabel::Bullish
        } else if score <= -50.0 {
            BiasLabel::StrongBearish
        } else if score <= -15.0 {
            BiasLabel::Bearish
        } else {
            BiasLabel::Neutral
        }
    }
}

impl fmt::Display for BiasLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BiasLabel::StrongBearish => "STRONG_BEARISH",
            BiasLabel::Bearish => "BEARISH",
            BiasLabel::Neutral => "NEUTRAL",
            BiasLabel::Bullish => "BULLISH",
            BiasLabel::StrongBullish => "STRONG_BULLISH",
        };
        f.write_str(s)
    }
}

/// Per-timeframe breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeBias {
    /// Mean of the defined components in [-1, 1]; `None` if too few.
    pub score: Option<f64>,
    pub weight: f64,
    /// Component name → signed strength in [-1, 1].
    pub components: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    /// Weighted score in [-100, 100].
    pub score: f64,
    pub label: BiasLabel,
    pub quality: BiasQuality,
    pub timeframes: BTreeMap<Timeframe, TimeframeBias>,
}

/// Combines indicator sets across timeframes.
#[derive(Debug, Clone)]
pub struct MarketBiasAggregator {
    weights: BTreeMap<Timeframe, f64>,
}

impl Default for MarketBiasAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketBiasAggregator {
    pub fn new() -> Self {
        let weights = BTreeMap::from([
            (Timeframe::M1, 0.5),
            (Timeframe::M15, 1.0),
            (Timeframe::H1, 2.0),
            (Timeframe::D1, 3.0),
        ]);
        Self { weights }
    }

    pub fn with_weight(mut self, timeframe: Timeframe, weight: f64) -> Self {
        self.weights.insert(timeframe, weight.max(0.0));
        self
    }

    pub fn weight(&self, timeframe: Timeframe) -> f64 {
        self.weights.get(&timeframe).copied().unwrap_or(1.0)
    }

    pub fn bias(&self, sets: &BTreeMap<Timeframe, IndicatorSet>) -> BiasReport {
        let mut timeframes = BTreeMap::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (tf, set) in sets {
            let components = components(set);
            let score = (components.len() >= MIN_COMPONENTS)
                .then(|| components.values().sum::<f64>() / components.len() as f64);
            let weight = self.weight(*tf);
            if let Some(s) = score {
                if weight > 0.0 {
                    weighted += s * weight;
                    total_weight += weight;
                }
            }
            timeframes.insert(
                *tf,
                TimeframeBias {
                    score,
                    weight,
                    components,
                },
            );
        }

        let contributing = timeframes.values().filter(|t| t.score.is_some()).count();
        let quality = if contributing == 0 || total_weight == 0.0 {
            BiasQuality::InsufficientData
        } else if contributing < timeframes.len() {
            BiasQuality::Partial
        } else {
            BiasQuality::Computed
        };

        let score = if quality == BiasQuality::InsufficientData {
            0.0
        } else {
            (100.0 * weighted / total_weight).clamp(-100.0, 100.0)
        };

        debug!(
            score,
            quality = ?quality,
            timeframes = timeframes.len(),
            contributing,
            "Computed market bias"
        );

        BiasReport {
            score,
            label: BiasLabel::from_score(score),
            quality,
            timeframes,
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn oscillator(value: f64) -> f64 {
    ((value - 50.0) / 50.0).clamp(-1.0, 1.0)
}

/// Signed components available for one timeframe.
fn components(set: &IndicatorSet) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();

    if let (Some(fast), Some(slow)) = (set.latest(indicators::EMA_FAST), set.latest(indicators::EMA_SLOW)) {
        out.insert("ema_trend".to_string(), sign(fast - slow));
    }
    if let (Some(close), Some(mid)) = (set.last_close, set.latest(indicators::BB_MIDDLE)) {
        out.insert("close_vs_mean".to_string(), sign(close - mid));
    }
    if let Some(rsi) = set.latest(indicators::RSI) {
        out.insert("rsi".to_string(), oscillator(rsi));
    }
    if let Some(hist) = set.latest(indicators::MACD_HISTOGRAM) {
        out.insert("macd_histogram".to_string(), sign(hist));
    }
    if let Some(imi) = set.latest(indicators::IMI) {
        out.insert("imi".to_string(), oscillator(imi));
    }
    if let Some(mfi) = set.latest(indicators::MFI) {
        out.insert("mfi".to_string(), oscillator(mfi));
    }
    if let (Some(bull), Some(bear)) = (
        set.latest_pattern(indicators::BULLISH_ENGULFING),
        set.latest_pattern(indicators::BEARISH_ENGULFING),
    ) {
        out.insert(
            "engulfing".to_string(),
            f64::from(u8::from(bull)) - f64::from(u8::from(bear)),
        );
    }
    if set.bars_used >= 3 {
        let recent = set
            .fair_value_gaps
            .iter()
            .rev()
            .find(|g| g.index + FVG_LOOKBACK >= set.bars_used)
            .map_or(0.0, |g| match g.direction {
                GapDirection::Bullish => 1.0,
                GapDirection::Bearish => -1.0,
            });
        out.insert("fair_value_gap".to_string(), recent);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorEngine;
    use crate::series::SymbolSeries;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use types::bar::Bar;
    use types::ids::Symbol;

    fn set(tf: Timeframe, closes: &[i64]) -> IndicatorSet {
        let start = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        // Each bar opens at the previous close.
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let open = Decimal::from(closes[i.saturating_sub(1)]);
                let c = Decimal::from(*c);
                Bar::new(
                    Symbol::new("X"),
                    start + Duration::minutes(15 * i as i64),
                    open,
                    open.max(c) + Decimal::ONE,
                    open.min(c) - Decimal::ONE,
                    c,
                    Decimal::from(100),
                )
            })
            .collect();
        IndicatorEngine::default().compute(&SymbolSeries::new(Symbol::new("X"), tf, bars))
    }

    fn rising(n: i64) -> Vec<i64> {
        (0..n).map(|i| 100 + 2 * i).collect()
    }

    fn falling(n: i64) -> Vec<i64> {
        (0..n).map(|i| 300 - 2 * i).collect()
    }

    #[test]
    fn test_no_data_is_insufficient_not_neutral_signal() {
        let report = MarketBiasAggregator::new().bias(&BTreeMap::new());
        assert_eq!(report.quality, BiasQuality::InsufficientData);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.label, BiasLabel::Neutral);

        let sets = BTreeMap::from([(Timeframe::M15, set(Timeframe::M15, &[100]))]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert_eq!(report.quality, BiasQuality::InsufficientData);
        assert_eq!(report.timeframes[&Timeframe::M15].score, None);
    }

    #[test]
    fn test_uptrend_is_bullish() {
        let sets = BTreeMap::from([
            (Timeframe::M15, set(Timeframe::M15, &rising(60))),
            (Timeframe::H1, set(Timeframe::H1, &rising(40))),
        ]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert_eq!(report.quality, BiasQuality::Computed);
        assert!(report.score > 50.0, "score {}", report.score);
        assert_eq!(report.label, BiasLabel::StrongBullish);
    }

    #[test]
    fn test_downtrend_is_bearish() {
        let sets = BTreeMap::from([(Timeframe::D1, set(Timeframe::D1, &falling(60)))]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert!(report.score < -50.0, "score {}", report.score);
        assert!(matches!(report.label, BiasLabel::StrongBearish));
    }

    #[test]
    fn test_missing_timeframe_marks_partial() {
        let sets = BTreeMap::from([
            (Timeframe::M15, set(Timeframe::M15, &rising(60))),
            (Timeframe::D1, set(Timeframe::D1, &[100, 101])),
        ]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert_eq!(report.quality, BiasQuality::Partial);
        assert!(report.score > 0.0);
        assert!(report.timeframes[&Timeframe::D1].score.is_none());
    }

    #[test]
    fn test_score_is_bounded() {
        let sets = BTreeMap::from([
            (Timeframe::M15, set(Timeframe::M15, &rising(200))),
            (Timeframe::H1, set(Timeframe::H1, &rising(200))),
            (Timeframe::D1, set(Timeframe::D1, &rising(200))),
        ]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert!((-100.0..=100.0).contains(&report.score));
    }

    #[test]
    fn test_longer_timeframe_dominates() {
        let sets = BTreeMap::from([
            (Timeframe::M15, set(Timeframe::M15, &falling(60))),
            (Timeframe::D1, set(Timeframe::D1, &rising(60))),
        ]);
        let report = MarketBiasAggregator::new().bias(&sets);
        assert!(report.score > 0.0);
    }

    #[test]
    fn test_custom_weight_overrides_default() {
        let sets = BTreeMap::from([
            (Timeframe::M15, set(Timeframe::M15, &falling(60))),
            (Timeframe::D1, set(Timeframe::D1, &rising(60))),
        ]);
        let aggregator = MarketBiasAggregator::new()
            .with_weight(Timeframe::M15, 10.0)
            .with_weight(Timeframe::M1, -1.0);
        assert_eq!(aggregator.weight(Timeframe::M15), 10.0);
        assert_eq!(aggregator.weight(Timeframe::M1), 0.0);

        let report = aggregator.bias(&sets);
        assert!(report.score < 0.0, "score {}", report.score);
        assert_eq!(report.timeframes[&Timeframe::M15].weight, 10.0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(BiasLabel::from_score(0.0), BiasLabel::Neutral);
        assert_eq!(BiasLabel::from_score(20.0), BiasLabel::Bullish);
        assert_eq!(BiasLabel::from_score(-75.0), BiasLabel::StrongBearish);
        assert_eq!(BiasLabel::StrongBullish.to_string(), "STRONG_BULLISH");
    }
}
