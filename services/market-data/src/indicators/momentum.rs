//! Intraday Momentum Index and Money Flow Index
//!
//! Both are bounded 0..100 oscillators over a rolling window. A window with
//! no movement at all (zero denominator) reads 50: the market was flat,
//! which is a computed neutral, not missing data.

use types::bar::Bar;
use types::numeric::to_f64;

use super::RingBuf;

/// IMI: up-candle bodies over total body movement within the window.
#[derive(Debug, Clone)]
pub struct ImiIndicator {
    ups: RingBuf,
    downs: RingBuf,
}

impl ImiIndicator {
    pub fn new(period: usize) -> Self {
        Self {
            ups: RingBuf::new(period),
            downs: RingBuf::new(period),
        }
    }

    pub fn update(&mut self, open: f64, close: f64) -> Option<f64> {
        let body = close - open;
        self.ups.push(body.max(0.0));
        self.downs.push((-body).max(0.0));
        if !self.ups.full() {
            return None;
        }
        let up = self.ups.sum();
        let total = up + self.downs.sum();
        if total == 0.0 {
            return Some(50.0);
        }
        Some(100.0 * up / total)
    }
}

/// IMI over a bar series; the first `period - 1` entries are undefined.
pub fn imi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut imi = ImiIndicator::new(period);
    bars.iter()
        .map(|b| imi.update(to_f64(b.open), to_f64(b.close)))
        .collect()
}

/// MFI: RSI analogue over raw money flow (typical price × volume).
///
/// Flow direction comes from the change in typical price, so the first bar
/// contributes no flow and index `period` is the first defined value.
#[derive(Debug, Clone)]
pub struct MfiIndicator {
    positive: RingBuf,
    negative: RingBuf,
    prev_typical: Option<f64>,
}

impl MfiIndicator {
    pub fn new(period: usize) -> Self {
        Self {
            positive: RingBuf::new(period),
            negative: RingBuf::new(period),
            prev_typical: None,
        }
    }

    pub fn update(&mut self, typical: f64, volume: f64) -> Option<f64> {
        let prev = self.prev_typical.replace(typical)?;
        let flow = typical * volume;
        let (pos, neg) = if typical > prev {
            (flow, 0.0)
        } else if typical < prev {
            (0.0, flow)
        } else {
            (0.0, 0.0)
        };
        self.positive.push(pos);
        self.negative.push(neg);
        if !self.positive.full() {
            return None;
        }

        let pos = self.positive.sum();
        let neg = self.negative.sum();
        Some(if pos == 0.0 && neg == 0.0 {
            50.0
        } else if neg == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + pos / neg)
        })
    }
}

/// MFI over a bar series; the first `period` entries are undefined.
pub fn mfi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut mfi = MfiIndicator::new(period);
    bars.iter()
        .map(|b| mfi.update(to_f64(b.typical_price()), to_f64(b.volume)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use types::ids::Symbol;

    fn bars(ohlc: &[(i64, i64)], volume: i64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, (o, c))| {
                let (o, c) = (Decimal::from(*o), Decimal::from(*c));
                Bar::new(
                    Symbol::new("X"),
                    start + Duration::minutes(i as i64),
                    o,
                    o.max(c),
                    o.min(c),
                    c,
                    Decimal::from(volume),
                )
            })
            .collect()
    }

    #[test]
    fn test_imi_warm_up_and_value() {
        // bodies +2, -1, +1, +0
        let out = imi(&bars(&[(10, 12), (12, 11), (11, 12), (12, 12)], 1), 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!((out[2].unwrap() - 75.0).abs() < 1e-9);
        // bodies -1, +1, 0: up 1, down 1
        assert!((out[3].unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_imi_flat_window_is_neutral() {
        let out = imi(&bars(&[(10, 10); 5], 1), 3);
        assert_eq!(out[4], Some(50.0));
    }

    #[test]
    fn test_mfi_warm_up() {
        let ohlc: Vec<(i64, i64)> = (0..20).map(|i| (100 + i, 101 + i)).collect();
        let out = mfi(&bars(&ohlc, 10), 14);
        assert!(out[..14].iter().all(Option::is_none));
        assert!(out[14..].iter().all(Option::is_some));
    }

    #[test]
    fn test_mfi_all_inflow_is_100() {
        let ohlc: Vec<(i64, i64)> = (0..20).map(|i| (100 + i, 101 + i)).collect();
        let out = mfi(&bars(&ohlc, 10), 14);
        assert_eq!(out[19], Some(100.0));
    }

    #[test]
    fn test_mfi_all_outflow_is_0() {
        let ohlc: Vec<(i64, i64)> = (0..20).map(|i| (200 - i, 199 - i)).collect();
        let out = mfi(&bars(&ohlc, 10), 14);
        assert_eq!(out[19], Some(0.0));
    }

    #[test]
    fn test_mfi_zero_volume_is_neutral() {
        let ohlc: Vec<(i64, i64)> = (0..20).map(|i| (100 + i, 101 + i)).collect();
        let out = mfi(&bars(&ohlc, 0), 14);
        assert_eq!(out[19], Some(50.0));
    }
}
