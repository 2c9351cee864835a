//! Candle patterns
//!
//! Fair value gaps are sparse: each three-candle window is evaluated once
//! and a gap, if any, is flagged on the third candle. Engulfing compares
//! each bar with its predecessor, so the first bar never has a value.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDirection {
    Bullish,
    Bearish,
}

/// Price range left untraded between candles `i - 1` and `i + 1`.
// TODO: track whether later bars trade back into the gap (filled/unfilled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairValueGap {
    /// Timestamp of the candle completing the pattern.
    pub timestamp: NaiveDateTime,
    /// Index of that candle within the series.
    pub index: usize,
    pub direction: GapDirection,
    pub lower: Decimal,
    pub upper: Decimal,
}

/// Detect fair value gaps; fewer than three bars yields none.
pub fn fair_value_gaps(bars: &[Bar]) -> Vec<FairValueGap> {
    bars.windows(3)
        .enumerate()
        .filter_map(|(start, w)| {
            let (first, third) = (&w[0], &w[2]);
            let (direction, lower, upper) = if third.low > first.high {
                (GapDirection::Bullish, first.high, third.low)
            } else if third.high < first.low {
                (GapDirection::Bearish, third.high, first.low)
            } else {
                return None;
            };
            Some(FairValueGap {
                timestamp: third.timestamp,
                index: start + 2,
                direction,
                lower,
                upper,
            })
        })
        .collect()
}

fn is_bullish(bar: &Bar) -> bool {
    bar.close > bar.open
}

fn is_bearish(bar: &Bar) -> bool {
    bar.close < bar.open
}

/// Bullish and bearish engulfing flags per timestamp.
///
/// The first bar has no predecessor and is always `None`; every later bar
/// is defined.
pub fn engulfing(bars: &[Bar]) -> (Vec<Option<bool>>, Vec<Option<bool>>) {
    let mut bullish = Vec::with_capacity(bars.len());
    let mut bearish = Vec::with_capacity(bars.len());
    if !bars.is_empty() {
        bullish.push(None);
        bearish.push(None);
    }

    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        bullish.push(Some(
            is_bearish(prev) && is_bullish(cur) && cur.open <= prev.close && cur.close >= prev.open,
        ));
        bearish.push(Some(
            is_bullish(prev) && is_bearish(cur) && cur.open >= prev.close && cur.close <= prev.open,
        ));
    }
    (bullish, bearish)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use types::ids::Symbol;

    fn candles(ohlc: &[(i64, i64, i64, i64)]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, (o, h, l, c))| {
                Bar::new(
                    Symbol::new("X"),
                    start + Duration::minutes(i as i64),
                    Decimal::from(*o),
                    Decimal::from(*h),
                    Decimal::from(*l),
                    Decimal::from(*c),
                    Decimal::ONE,
                )
            })
            .collect()
    }

    #[test]
    fn test_bullish_gap() {
        let bars = candles(&[(10, 11, 9, 11), (11, 15, 11, 15), (15, 16, 13, 16)]);
        let gaps = fair_value_gaps(&bars);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].direction, GapDirection::Bullish);
        assert_eq!(gaps[0].index, 2);
        assert_eq!(gaps[0].timestamp, bars[2].timestamp);
        assert_eq!(gaps[0].lower, Decimal::from(11));
        assert_eq!(gaps[0].upper, Decimal::from(13));
    }

    #[test]
    fn test_bearish_gap() {
        let bars = candles(&[(20, 21, 19, 19), (19, 19, 15, 15), (15, 17, 14, 14)]);
        let gaps = fair_value_gaps(&bars);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].direction, GapDirection::Bearish);
        assert_eq!(gaps[0].lower, Decimal::from(17));
        assert_eq!(gaps[0].upper, Decimal::from(19));
    }

    #[test]
    fn test_no_gap_is_empty_not_error() {
        let bars = candles(&[(10, 12, 9, 11), (11, 12, 10, 11), (11, 12, 10, 11)]);
        assert!(fair_value_gaps(&bars).is_empty());
        assert!(fair_value_gaps(&bars[..2]).is_empty());
    }

    #[test]
    fn test_gap_is_not_revisited_by_later_bars() {
        let mut ohlc = vec![(10, 11, 9, 11), (11, 15, 11, 15), (15, 16, 13, 16)];
        let before = fair_value_gaps(&candles(&ohlc));
        // price trades back through the gap
        ohlc.push((16, 16, 10, 10));
        let after = fair_value_gaps(&candles(&ohlc));
        assert_eq!(after[0], before[0]);
    }

    #[test]
    fn test_engulfing() {
        let bars = candles(&[
            (12, 12, 10, 10), // bearish
            (9, 14, 9, 13),   // bullish engulfing
            (13, 13, 11, 12), // small bearish
            (14, 14, 10, 11), // bearish after bearish
        ]);
        let (bull, bear) = engulfing(&bars);
        assert_eq!(bull, vec![None, Some(true), Some(false), Some(false)]);
        assert_eq!(bear, vec![None, Some(false), Some(false), Some(false)]);

        let bars = candles(&[(10, 12, 10, 12), (13, 13, 9, 9)]);
        let (_, bear) = engulfing(&bars);
        assert_eq!(bear, vec![None, Some(true)]);
    }

    #[test]
    fn test_first_bar_unaffected_by_later_bars() {
        let bars = candles(&[(10, 12, 10, 12), (13, 13, 9, 9)]);
        let (one_bull, one_bear) = engulfing(&bars[..1]);
        let (two_bull, two_bear) = engulfing(&bars);
        assert_eq!(one_bull, vec![None]);
        assert_eq!(one_bear, vec![None]);
        assert_eq!(two_bull[0], one_bull[0]);
        assert_eq!(two_bear[0], one_bear[0]);
        assert!(engulfing(&[]).0.is_empty());
    }
}
