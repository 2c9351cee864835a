//! OHLCV bar type
//!
//! A `Bar` is one OHLCV observation for a fixed interval. Timestamps are
//! exchange-local wall-clock times marking the start of the interval.

use chrono::{NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::Symbol;

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    /// Interval start, exchange-local.
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        symbol: Symbol,
        timestamp: NaiveDateTime,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate bar integrity (OHLCV invariants).
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }

    /// Whether the timestamp sits exactly on a minute boundary.
    pub fn is_minute_aligned(&self) -> bool {
        self.timestamp.second() == 0 && self.timestamp.nanosecond() == 0
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}
