//! Batched bar-fetch collaborator
//!
//! The analytics core never talks to a data vendor directly. A host plugs in
//! a `BarSource`; `MarketContext::refresh_bars` drives it with the cache's
//! newest timestamp as the lower bound.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use types::bar::Bar;
use types::errors::FetchError;
use types::ids::Symbol;

/// Source of 1-minute bars over a time range.
///
/// An empty result is a valid answer (no trading in the range). Errors are
/// reserved for the source being unable to answer at all.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Bars with `start <= timestamp <= end`, ordered by timestamp. `start`
    /// of `None` asks for everything the source has up to `end`.
    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDateTime>,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, FetchError>;
}

/// In-memory `BarSource` backed by a fixed bar set per symbol.
///
/// Records every requested range so callers can check the cursor they sent.
#[derive(Debug, Default)]
pub struct StaticBarSource {
    bars: BTreeMap<Symbol, Vec<Bar>>,
    failing: BTreeMap<Symbol, String>,
    requests: Mutex<Vec<(Symbol, Option<NaiveDateTime>, NaiveDateTime)>>,
}

impl StaticBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: Symbol, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        self.bars.insert(symbol, bars);
        self
    }

    /// Make every fetch for `symbol` fail with `reason`.
    pub fn with_failure(mut self, symbol: Symbol, reason: impl Into<String>) -> Self {
        self.failing.insert(symbol, reason.into());
        self
    }

    pub fn requests(&self) -> Vec<(Symbol, Option<NaiveDateTime>, NaiveDateTime)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BarSource for StaticBarSource {
    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDateTime>,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((symbol.clone(), start, end));
        }
        if let Some(reason) = self.failing.get(symbol) {
            return Err(FetchError::Unavailable {
                symbol: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| start.map_or(true, |s| b.timestamp >= s) && b.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
