//! Configuration for the analytics context
//!
//! Every section has a `Default` matching production settings and can be
//! overridden from JSON; omitted fields keep their defaults.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use types::errors::AnalyticsError;

/// Whether a still-accumulating last bucket is returned by aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialBucketPolicy {
    /// Return the partial bucket, flagged on the series.
    Include,
    /// Drop the partial bucket from the output.
    Exclude,
}

/// Longest accepted retention window.
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Configuration for the minute bar cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Calendar days of minute bars kept per symbol, measured back from the
    /// newest stored bar.
    pub retention_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { retention_days: 60 }
    }
}

/// Configuration for timeframe aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Regular session open (exchange-local); daily buckets are stamped here.
    pub session_open: NaiveTime,
    /// Regular session close; a daily bucket is partial until a bar reaches it.
    pub session_close: NaiveTime,
    pub partial_policy: PartialBucketPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            session_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            session_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            partial_policy: PartialBucketPolicy::Include,
        }
    }
}

/// Indicator periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_window: usize,
    pub bollinger_k: f64,
    pub imi_period: usize,
    pub mfi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Skip a partial trailing bucket when computing indicators.
    pub exclude_partial: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_window: 20,
            bollinger_k: 2.0,
            imi_period: 14,
            mfi_period: 14,
            ema_fast: 9,
            ema_slow: 21,
            exclude_partial: false,
        }
    }
}

/// Configuration for the stream supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Consecutive failed (re)connect attempts before the task gives up.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Capacity of the transport → reconciler channel.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            channel_capacity: 1024,
        }
    }
}

impl StreamConfig {
    /// Backoff before retry number `attempt` (1-based): doubles from the
    /// initial delay, capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

/// Configuration for the stream reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Number of rejected updates kept for inspection.
    pub quarantine_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            quarantine_capacity: 256,
        }
    }
}

/// Complete configuration for a `MarketContext`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub cache: CacheConfig,
    pub aggregation: AggregationConfig,
    pub indicators: IndicatorConfig,
    pub stream: StreamConfig,
    pub reconciler: ReconcilerConfig,
}

impl AnalyticsConfig {
    /// Parse a JSON document; missing sections and fields keep defaults.
    pub fn from_json_str(json: &str) -> Result<Self, AnalyticsError> {
        let config: Self = serde_json::from_str(json).map_err(|e| AnalyticsError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let ind = &self.indicators;
        let periods = [
            ("rsi_period", ind.rsi_period),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("macd_signal", ind.macd_signal),
            ("bollinger_window", ind.bollinger_window),
            ("imi_period", ind.imi_period),
            ("mfi_period", ind.mfi_period),
            ("ema_fast", ind.ema_fast),
            ("ema_slow", ind.ema_slow),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(AnalyticsError::Config {
                    message: format!("{name} must be positive"),
                });
            }
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(AnalyticsError::Config {
                message: "macd_fast must be shorter than macd_slow".to_string(),
            });
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.cache.retention_days) {
            return Err(AnalyticsError::Config {
                message: format!("retention_days must be between 1 and {MAX_RETENTION_DAYS}"),
            });
        }
        if self.aggregation.session_close <= self.aggregation.session_open {
            return Err(AnalyticsError::Config {
                message: "session_close must be after session_open".to_string(),
            });
        }
        Ok(())
    }
}
