use super::RingBuf;

/// Exponential moving average, seeded with the first observation
/// (`adjust = False` recursion, α = 2 / (window + 1)).
///
/// The recursion runs from the first sample, but the value is only reported
/// once `window` samples have been seen.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: f64,
    window: usize,
    count: usize,
}

impl Ema {
    pub fn new(window: usize) -> Self {
        Self {
            alpha: 2.0 / (window as f64 + 1.0),
            value: 0.0,
            window,
            count: 0,
        }
    }

    /// Feed one sample and return the EMA once warm.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        if self.count == 0 {
            self.value = price;
        } else {
            self.value = self.alpha * price + (1.0 - self.alpha) * self.value;
        }
        self.count += 1;
        self.current()
    }

    /// Running value regardless of warm-up.
    pub fn raw(&self) -> f64 {
        self.value
    }

    pub fn current(&self) -> Option<f64> {
        self.is_warm().then_some(self.value)
    }

    pub fn is_warm(&self) -> bool {
        self.count >= self.window
    }
}

/// EMA over a whole series; the first `period - 1` entries are undefined.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut ema = Ema::new(period);
    values.iter().map(|v| ema.update(*v)).collect()
}

/// Simple moving average; the first `period - 1` entries are undefined.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut ring = RingBuf::new(period);
    values
        .iter()
        .map(|v| {
            ring.push(*v);
            ring.full().then(|| ring.mean())
        })
        .collect()
}
