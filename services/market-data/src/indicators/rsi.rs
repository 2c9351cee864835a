/// RSI with Wilder smoothing of average gain and loss.
///
/// The first `window` closes only seed the averages (a simple mean of the
/// first `window` changes), so index `window` is the first defined value.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    window: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    gain_sum: f64,
    loss_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl RsiIndicator {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            count: 0,
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        // Non-finite closes are skipped so they cannot poison the averages.
        if !close.is_finite() {
            return self.value;
        }
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let w = self.window as f64;

        if self.count < self.window {
            self.gain_sum += gain;
            self.loss_sum += loss;
            self.count += 1;
            if self.count < self.window {
                return None;
            }
            self.avg_gain = self.gain_sum / w;
            self.avg_loss = self.loss_sum / w;
        } else {
            self.avg_gain = (self.avg_gain * (w - 1.0) + gain) / w;
            self.avg_loss = (self.avg_loss * (w - 1.0) + loss) / w;
        }

        let value = if self.avg_loss == 0.0 && self.avg_gain == 0.0 {
            50.0
        } else if self.avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        };
        self.value = Some(value);
        self.value
    }
}

/// RSI over a whole series; the first `period` entries are undefined.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi = RsiIndicator::new(period);
    closes.iter().map(|c| rsi.update(*c)).collect()
}
