//! Timeframe aggregation
//!
//! Derives 15-minute, hourly, and daily series from the 1-minute series.
//! Pure and deterministic: the same input always yields the same output.
//!
//! Bucket boundaries align to calendar time (see `Timeframe::bucket_start`).
//! Buckets with no contributing minute bars are omitted rather than
//! backfilled. The most recent bucket is flagged partial when the latest
//! minute bar ends before the bucket's end boundary.

use chrono::Duration;
use serde_json::Value;
use types::bar::Bar;
use types::errors::SchemaError;
use types::ids::Symbol;

use crate::config::{AggregationConfig, PartialBucketPolicy};
use crate::schema::decode_bars;
use crate::series::{SymbolSeries, Timeframe};

/// Folds minute bars into higher-timeframe buckets.
#[derive(Debug, Clone, Default)]
pub struct TimeframeAggregator {
    config: AggregationConfig,
}

impl TimeframeAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate a 1-minute series into `target`.
    ///
    /// Fails with `SchemaError` if the input is not a valid, ordered
    /// 1-minute series.
    pub fn aggregate(
        &self,
        series: &SymbolSeries,
        target: Timeframe,
    ) -> Result<SymbolSeries, SchemaError> {
        if series.timeframe != Timeframe::M1 {
            return Err(SchemaError::UnexpectedTimeframe {
                expected: Timeframe::M1.to_string(),
                actual: series.timeframe.to_string(),
            });
        }
        series.validate()?;

        if target == Timeframe::M1 {
            return Ok(SymbolSeries::new(
                series.symbol.clone(),
                Timeframe::M1,
                series.bars.clone(),
            ));
        }

        let open = self.config.session_open;
        let mut buckets: Vec<Bar> = Vec::new();
        for bar in &series.bars {
            let start = target.bucket_start(bar.timestamp, open);
            match buckets.last_mut() {
                Some(current) if current.timestamp == start => {
                    current.high = current.high.max(bar.high);
                    current.low = current.low.min(bar.low);
                    current.close = bar.close;
                    current.volume += bar.volume;
                }
                _ => buckets.push(Bar {
                    timestamp: start,
                    ..bar.clone()
                }),
            }
        }

        let mut partial_last = false;
        if let (Some(bucket), Some(latest)) = (buckets.last(), series.last()) {
            let end = target.bucket_end(bucket.timestamp, self.config.session_close);
            partial_last = latest.timestamp + Duration::minutes(1) < end;
        }
        if partial_last && self.config.partial_policy == PartialBucketPolicy::Exclude {
            buckets.pop();
            partial_last = false;
        }

        tracing::debug!(
            symbol = %series.symbol,
            timeframe = %target,
            minute_bars = series.len(),
            buckets = buckets.len(),
            partial_last,
            "Aggregated series"
        );

        Ok(SymbolSeries {
            symbol: series.symbol.clone(),
            timeframe: target,
            bars: buckets,
            partial_last,
        })
    }

    /// Aggregate into every derived timeframe.
    pub fn aggregate_all(&self, series: &SymbolSeries) -> Result<Vec<SymbolSeries>, SchemaError> {
        Timeframe::derived()
            .iter()
            .map(|tf| self.aggregate(series, *tf))
            .collect()
    }

    /// Decode raw fetch rows and aggregate them in one step.
    pub fn aggregate_records(
        &self,
        symbol: &Symbol,
        rows: &[Value],
        target: Timeframe,
    ) -> Result<SymbolSeries, SchemaError> {
        let bars = decode_bars(symbol, rows)?;
        let series = SymbolSeries::new(symbol.clone(), Timeframe::M1, bars);
        self.aggregate(&series, target)
    }
}
