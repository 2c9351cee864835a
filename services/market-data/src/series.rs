//! Timeframes and ordered bar series
//!
//! A `SymbolSeries` is the unit every downstream component consumes: the
//! bars of one symbol at one timeframe, strictly increasing in time. Gaps
//! (holidays, illiquid minutes) are legal; duplicates and reordering are not.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use types::bar::Bar;
use types::errors::SchemaError;
use types::ids::Symbol;

/// Supported bar timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    M1,
    /// 15 minutes
    M15,
    /// 1 hour
    H1,
    /// 1 trading day
    D1,
}

impl Timeframe {
    /// Intraday bucket width in minutes. `None` for `D1`, whose bucket is
    /// bounded by the session rather than a fixed width.
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Timeframe::M1 => Some(1),
            Timeframe::M15 => Some(15),
            Timeframe::H1 => Some(60),
            Timeframe::D1 => None,
        }
    }

    /// Timeframes derived from the 1-minute series.
    pub fn derived() -> &'static [Timeframe] {
        &[Timeframe::M15, Timeframe::H1, Timeframe::D1]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    /// Start of the bucket containing `ts`.
    ///
    /// Intraday buckets align to the clock (15m at :00/:15/:30/:45, 1h on
    /// the hour). Daily buckets are keyed by calendar date and stamped at
    /// `session_open`.
    pub fn bucket_start(&self, ts: NaiveDateTime, session_open: NaiveTime) -> NaiveDateTime {
        match self.minutes() {
            Some(width) => {
                let minute_of_day = ts.hour() * 60 + ts.minute();
                let aligned = minute_of_day - minute_of_day % width;
                ts.date()
                    .and_hms_opt(aligned / 60, aligned % 60, 0)
                    .unwrap_or(ts)
            }
            None => ts.date().and_time(session_open),
        }
    }

    /// Exclusive end of the bucket that starts at `start`.
    pub fn bucket_end(&self, start: NaiveDateTime, session_close: NaiveTime) -> NaiveDateTime {
        match self.minutes() {
            Some(width) => start + Duration::minutes(i64::from(width)),
            None => start.date().and_time(session_close),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "m1" | "1min" => Ok(Timeframe::M1),
            "15m" | "m15" | "15min" => Ok(Timeframe::M15),
            "1h" | "h1" | "60m" => Ok(Timeframe::H1),
            "1d" | "d1" | "daily" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// Ordered bars for one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSeries {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    /// The last bar is a bucket that was still accumulating when built.
    pub partial_last: bool,
}

impl SymbolSeries {
    pub fn new(symbol: Symbol, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            symbol,
            timeframe,
            bars,
            partial_last: false,
        }
    }

    pub fn empty(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self::new(symbol, timeframe, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Whether the bar at `index` is the accumulating bucket.
    pub fn is_partial(&self, index: usize) -> bool {
        self.partial_last && index + 1 == self.bars.len()
    }

    /// Bars whose buckets are closed.
    pub fn closed_bars(&self) -> &[Bar] {
        if self.partial_last && !self.bars.is_empty() {
            &self.bars[..self.bars.len() - 1]
        } else {
            &self.bars
        }
    }

    /// Check ordering, symbol, and bar invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (index, bar) in self.bars.iter().enumerate() {
            if bar.symbol != self.symbol {
                return Err(SchemaError::SymbolMismatch {
                    expected: self.symbol.to_string(),
                    actual: bar.symbol.to_string(),
                });
            }
            if !bar.is_valid() {
                return Err(SchemaError::InvalidBar { index });
            }
            if index > 0 && self.bars[index - 1].timestamp >= bar.timestamp {
                return Err(SchemaError::Unordered { index });
            }
        }
        Ok(())
    }
}
