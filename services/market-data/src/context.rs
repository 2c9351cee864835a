//! Market context
//!
//! The one object a host holds: bar cache, reconciler, optional stream
//! supervisor, and shared metrics, all wired from one `AnalyticsConfig`.
//! Nothing here is global; two contexts never share state.
//!
//! Concurrency:
//! - the bar cache sits behind an `RwLock`; computations copy the series
//!   out and release the lock before aggregating
//! - aggregation and indicator passes run concurrently across symbols but
//!   are serialized per symbol through a lock from `symbol_locks`
//! - snapshots are guarded inside the reconciler

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use types::bar::Bar;
use types::errors::{AnalyticsError, SchemaError, StreamError};
use types::ids::{ContractKey, Symbol};

use crate::aggregation::TimeframeAggregator;
use crate::bar_cache::{MergeReport, MinuteBarCache};
use crate::bias::{BiasReport, MarketBiasAggregator};
use crate::config::AnalyticsConfig;
use crate::events::StreamUpdate;
use crate::fetch::BarSource;
use crate::field_mapper::FieldMapper;
use crate::indicators::{IndicatorEngine, IndicatorSet};
use crate::metrics::AnalyticsMetrics;
use crate::reconciler::{MergeOutcome, MergeRejection, StreamReconciler};
use crate::series::{SymbolSeries, Timeframe};
use crate::snapshot::{OptionContractSnapshot, SnapshotTable};
use crate::stream::{StreamStatus, StreamSupervisor, StreamTransport};

pub struct MarketContext {
    config: AnalyticsConfig,
    cache: RwLock<MinuteBarCache>,
    aggregator: TimeframeAggregator,
    engine: IndicatorEngine,
    bias: MarketBiasAggregator,
    reconciler: Arc<StreamReconciler>,
    supervisor: Option<StreamSupervisor>,
    metrics: Arc<AnalyticsMetrics>,
    symbol_locks: DashMap<Symbol, Arc<Mutex<()>>>,
}

impl MarketContext {
    pub fn new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        config.validate()?;
        let metrics = Arc::new(AnalyticsMetrics::new());
        let reconciler = Arc::new(StreamReconciler::new(
            FieldMapper::with_default_codes(),
            config.reconciler.clone(),
            Arc::clone(&metrics),
        ));

        info!(
            retention_days = config.cache.retention_days,
            partial_policy = ?config.aggregation.partial_policy,
            "MarketContext initialized"
        );

        Ok(Self {
            cache: RwLock::new(MinuteBarCache::new(config.cache.clone())),
            aggregator: TimeframeAggregator::new(config.aggregation.clone()),
            engine: IndicatorEngine::new(config.indicators.clone()),
            bias: MarketBiasAggregator::new(),
            reconciler,
            supervisor: None,
            metrics,
            symbol_locks: DashMap::new(),
            config,
        })
    }

    /// Attach a push transport; enables `start_stream`/`stop_stream`.
    pub fn with_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.supervisor = Some(StreamSupervisor::new(
            transport,
            Arc::clone(&self.reconciler),
            self.config.stream.clone(),
        ));
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<AnalyticsMetrics> {
        &self.metrics
    }

    pub fn reconciler(&self) -> &Arc<StreamReconciler> {
        &self.reconciler
    }

    pub fn supervisor(&self) -> Option<&StreamSupervisor> {
        self.supervisor.as_ref()
    }

    fn symbol_lock(&self, symbol: &Symbol) -> Arc<Mutex<()>> {
        self.symbol_locks.entry(symbol.clone()).or_default().clone()
    }

    // ── Bars ────────────────────────────────────────────────────────────

    /// Merge fetched 1-minute bars; returns the number newly inserted.
    pub fn merge_bars(&self, symbol: &Symbol, bars: Vec<Bar>) -> usize {
        let report = self.merge_bars_with_report(symbol, bars);
        report.inserted
    }

    pub fn merge_bars_with_report(&self, symbol: &Symbol, bars: Vec<Bar>) -> MergeReport {
        let report = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_with_report(symbol, bars);
        self.metrics.record_merge(&report);
        report
    }

    /// Fetch bars newer than the cached cursor and merge them.
    ///
    /// A failed fetch is logged and counted, and yields zero new bars.
    pub async fn refresh_bars(
        &self,
        source: &dyn BarSource,
        symbol: &Symbol,
        end: NaiveDateTime,
    ) -> usize {
        let cursor = self.latest_timestamp(symbol);
        match source.fetch_bars(symbol, cursor, end).await {
            Ok(bars) if bars.is_empty() => {
                debug!(symbol = %symbol, cursor = ?cursor, "No new bars");
                0
            }
            Ok(bars) => {
                let fetched = bars.len();
                let inserted = self.merge_bars(symbol, bars);
                debug!(symbol = %symbol, fetched, inserted, "Refreshed bars");
                inserted
            }
            Err(e) => {
                self.metrics.record_fetch_failure();
                let err = AnalyticsError::from(e);
                warn!(symbol = %symbol, error = %err, "Bar refresh failed");
                0
            }
        }
    }

    pub fn latest_timestamp(&self, symbol: &Symbol) -> Option<NaiveDateTime> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest_timestamp(symbol)
    }

    /// Stored 1-minute series; empty for an unknown symbol.
    pub fn bars(&self, symbol: &Symbol) -> SymbolSeries {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bars(symbol)
    }

    /// Series at `timeframe`, aggregated from the cached minutes.
    pub fn series(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<SymbolSeries, SchemaError> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.series_unlocked(symbol, timeframe)
    }

    fn series_unlocked(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<SymbolSeries, SchemaError> {
        let minutes = self.bars(symbol);
        if timeframe == Timeframe::M1 {
            return Ok(minutes);
        }
        self.aggregator.aggregate(&minutes, timeframe)
    }

    // ── Indicators ──────────────────────────────────────────────────────

    pub fn compute_indicators(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<IndicatorSet, SchemaError> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.compute_unlocked(symbol, timeframe)
    }

    fn compute_unlocked(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<IndicatorSet, SchemaError> {
        let started = Instant::now();
        let series = self.series_unlocked(symbol, timeframe)?;
        let set = self.engine.compute(&series);
        self.metrics
            .record_indicator_pass(started.elapsed().as_nanos() as u64);
        Ok(set)
    }

    /// Indicator sets for every derived timeframe, in one pass per symbol.
    pub fn compute_all(&self, symbol: &Symbol) -> Result<BTreeMap<Timeframe, IndicatorSet>, SchemaError> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Timeframe::derived()
            .iter()
            .map(|tf| Ok((*tf, self.compute_unlocked(symbol, *tf)?)))
            .collect()
    }

    /// Multi-timeframe bias for `symbol`.
    pub fn bias(&self, symbol: &Symbol) -> Result<BiasReport, SchemaError> {
        let sets = self.compute_all(symbol)?;
        let report = self.bias.bias(&sets);
        debug!(symbol = %symbol, score = report.score, label = %report.label, "Bias computed");
        Ok(report)
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub fn merge_update(&self, update: StreamUpdate) -> Result<MergeOutcome, MergeRejection> {
        self.reconciler.merge_update(update)
    }

    pub fn snapshot(&self, key: &ContractKey) -> Option<OptionContractSnapshot> {
        self.reconciler.snapshot(key)
    }

    pub fn all_snapshots(&self) -> Vec<OptionContractSnapshot> {
        self.reconciler.all_snapshots()
    }

    pub fn snapshot_table(&self) -> SnapshotTable {
        self.reconciler.snapshot_table()
    }

    // ── Stream ──────────────────────────────────────────────────────────

    pub async fn start_stream<I, S>(&self, keys: I) -> Result<bool, AnalyticsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let supervisor = self.supervisor.as_ref().ok_or_else(|| {
            StreamError::Connection("no stream transport configured".to_string())
        })?;
        Ok(supervisor.start(keys).await?)
    }

    /// Stop the stream task, if any, and wait for it to exit.
    pub async fn stop_stream(&self) -> bool {
        match &self.supervisor {
            Some(supervisor) => supervisor.stop().await,
            None => false,
        }
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.supervisor
            .as_ref()
            .map_or(StreamStatus::Idle, StreamSupervisor::status)
    }
}

impl std::fmt::Debug for MarketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketContext")
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .field("stream", &self.stream_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::BiasQuality;
    use crate::fetch::StaticBarSource;
    use crate::indicators::RSI;
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use serde_json::json;

    fn ts(minute: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
            + Duration::minutes(minute)
    }

    fn bar(minute: i64, close: i64) -> Bar {
        let c = Decimal::from(close);
        Bar::new(Symbol::new("SPY"), ts(minute), c, c + Decimal::ONE, c - Decimal::ONE, c, Decimal::from(10))
    }

    fn ctx() -> MarketContext {
        MarketContext::new(AnalyticsConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_uses_cursor() {
        let spy = Symbol::new("SPY");
        let source = StaticBarSource::new().with_bars(spy.clone(), (0..30).map(|m| bar(m, 100 + m)).collect());
        let ctx = ctx();

        assert_eq!(ctx.refresh_bars(&source, &spy, ts(9)).await, 10);
        assert_eq!(ctx.refresh_bars(&source, &spy, ts(29)).await, 20);
        assert_eq!(ctx.refresh_bars(&source, &spy, ts(29)).await, 0);

        let requests = source.requests();
        assert_eq!(requests[0].1, None);
        assert_eq!(requests[1].1, Some(ts(9)));
        assert_eq!(ctx.bars(&spy).len(), 30);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_zero_bars() {
        let spy = Symbol::new("SPY");
        let source = StaticBarSource::new().with_failure(spy.clone(), "timeout");
        let ctx = ctx();
        ctx.merge_bars(&spy, vec![bar(0, 100)]);

        assert_eq!(ctx.refresh_bars(&source, &spy, ts(10)).await, 0);
        assert_eq!(ctx.bars(&spy).len(), 1);
        assert_eq!(ctx.metrics().export()["fetch_failures"], 1);
    }

    #[test]
    fn test_indicators_and_bias() {
        let spy = Symbol::new("SPY");
        let ctx = ctx();
        ctx.merge_bars(&spy, (0..30).map(|m| bar(m, 100 + m)).collect());

        let minute = ctx.compute_indicators(&spy, Timeframe::M1).unwrap();
        assert!(minute.latest(RSI).unwrap() >= 90.0);

        let fifteen = ctx.series(&spy, Timeframe::M15).unwrap();
        assert_eq!(fifteen.len(), 2);

        // 30 minutes of one session: too short for any derived timeframe.
        let report = ctx.bias(&spy).unwrap();
        assert_eq!(report.quality, BiasQuality::InsufficientData);
        assert!(ctx.metrics().export()["indicator_passes"] >= 4);
    }

    #[test]
    fn test_passes_serialized_per_symbol() {
        let spy = Symbol::new("SPY");
        let qqq = Symbol::new("QQQ");
        let ctx = ctx();
        ctx.merge_bars(&spy, (0..30).map(|m| bar(m, 100 + m)).collect());

        let lock = ctx.symbol_lock(&spy);
        let guard = lock.lock().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::scope(|s| {
            let (ctx, spy, qqq) = (&ctx, &spy, &qqq);
            s.spawn(move || {
                let set = ctx.compute_indicators(spy, Timeframe::M1).unwrap();
                tx.send(set.bars_used).unwrap();
            });

            // Another symbol is not held up by SPY's lock.
            let other = s.spawn(move || ctx.compute_indicators(qqq, Timeframe::M1).unwrap());
            assert!(other.join().unwrap().is_empty());

            assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
            drop(guard);
            assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 30);
        });
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let ctx = ctx();
        let set = ctx.compute_indicators(&Symbol::new("NONE"), Timeframe::H1).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_passthrough() {
        let ctx = ctx();
        let update = StreamUpdate::new("AAPL240119C150", chrono::Utc::now(), Default::default())
            .with_field("bidPrice", json!(1.25));
        let outcome = ctx.merge_update(update).unwrap();
        assert!(ctx.snapshot(&outcome.key).is_some());
        assert_eq!(ctx.snapshot_table().calls.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_without_transport() {
        let ctx = ctx();
        let err = ctx.start_stream(["AAPL240119C150"]).await;
        assert!(matches!(err, Err(AnalyticsError::Stream(_))));
        assert!(!ctx.stop_stream().await);
        assert_eq!(ctx.stream_status(), StreamStatus::Idle);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AnalyticsConfig::default();
        config.cache.retention_days = 0;
        assert!(MarketContext::new(config.clone()).is_err());

        config.cache.retention_days = 1_000_000_000_000;
        assert!(MarketContext::new(config).is_err());
    }
}
