use serde::{Deserialize, Serialize};

use super::ema::Ema;

/// MACD line, signal, and histogram for one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdOutput {
    pub macd: Option<f64>,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

/// MACD = EMA(fast) − EMA(slow); signal = EMA(MACD, signal).
///
/// All three EMAs recurse from the first bar. The line is reported from
/// index `slow - 1`; signal and histogram from `max(slow, signal) - 1`.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    ema_fast: Ema,
    ema_slow: Ema,
    ema_signal: Ema,
    slow: usize,
    signal: usize,
    count: usize,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            ema_fast: Ema::new(fast),
            ema_slow: Ema::new(slow),
            ema_signal: Ema::new(signal),
            slow,
            signal,
            count: 0,
        }
    }

    pub fn update(&mut self, close: f64) -> MacdOutput {
        self.ema_fast.update(close);
        self.ema_slow.update(close);
        let line = self.ema_fast.raw() - self.ema_slow.raw();
        self.ema_signal.update(line);
        let signal = self.ema_signal.raw();
        self.count += 1;

        let line_ready = self.count >= self.slow;
        let signal_ready = self.count >= self.slow.max(self.signal);
        MacdOutput {
            macd: line_ready.then_some(line),
            signal: signal_ready.then_some(signal),
            histogram: signal_ready.then_some(line - signal),
        }
    }
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdOutput> {
    let mut macd = MacdIndicator::new(fast, slow, signal);
    closes.iter().map(|c| macd.update(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_on_26_rows() {
        let closes: Vec<f64> = (0..26).map(|i| 100.0 + f64::from(i).sin()).collect();
        let out = macd(&closes, 12, 26, 9);
        for m in &out[..25] {
            assert_eq!(*m, MacdOutput::default());
        }
        assert!(out[25].macd.is_some());
        assert!(out[25].signal.is_some());
        assert!(out[25].histogram.is_some());
    }

    #[test]
    fn test_long_signal_delays_signal_only() {
        let closes: Vec<f64> = (0..12).map(f64::from).collect();
        let out = macd(&closes, 2, 4, 8);
        assert!(out[3].macd.is_some());
        assert!(out[3].signal.is_none());
        assert!(out[6].histogram.is_none());
        assert!(out[7].histogram.is_some());
    }

    #[test]
    fn test_flat_series_is_zero() {
        let out = macd(&[50.0; 40], 12, 26, 9);
        let last = out[39];
        assert!(last.macd.unwrap().abs() < 1e-9);
        assert!(last.histogram.unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_rising_series_has_positive_line() {
        let closes: Vec<f64> = (0..60).map(f64::from).collect();
        let last = *macd(&closes, 12, 26, 9).last().unwrap();
        assert!(last.macd.unwrap() > 0.0);
    }
}
