use serde::{Deserialize, Serialize};

use super::RingBuf;

/// Rolling mean ± k · population standard deviation.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    ring: RingBuf,
    num_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BbOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn new(window: usize, num_std: f64) -> Self {
        Self {
            ring: RingBuf::new(window),
            num_std,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BbOutput> {
        self.ring.push(close);
        if !self.ring.full() {
            return None;
        }
        let middle = self.ring.mean();
        let std = self.ring.std_pop();
        Some(BbOutput {
            upper: middle + self.num_std * std,
            middle,
            lower: middle - self.num_std * std,
        })
    }
}

/// Bands over a whole series; entries before `window` samples are undefined.
pub fn bollinger(closes: &[f64], window: usize, num_std: f64) -> Vec<Option<BbOutput>> {
    let mut bb = BollingerBands::new(window, num_std);
    closes.iter().map(|c| bb.update(*c)).collect()
}
