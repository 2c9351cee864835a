//! Market Data Analytics
//!
//! Turns two upstream feeds into queryable analytics:
//! - Batched 1-minute bars → cache → 15m/1h/1d aggregation → indicators →
//!   multi-timeframe bias
//! - Pushed option quote field updates → key normalization → field mapping →
//!   per-contract snapshots
//!
//! All derivations are deterministic: the same bars always yield the same
//! series and indicator values, and indicator values never look ahead.
//!
//! # Architecture
//!
//! ```text
//!   BarSource (batch)                 StreamTransport (push)
//!        │                                    │
//!  ┌─────▼──────┐                      ┌──────▼───────┐
//!  │ BarCache   │                      │ Supervisor   │ ← retry/backoff, status
//!  └─────┬──────┘                      └──────┬───────┘
//!        │                                    │
//!  ┌─────▼──────┐                 ┌───────────▼────────────┐
//!  │ Aggregator │                 │ ContractKey normalize  │
//!  └─────┬──────┘                 │ FieldMapper            │
//!        │                        └───────────┬────────────┘
//!  ┌─────▼──────┐                      ┌──────▼───────┐
//!  │ Indicators │                      │ Reconciler   │ → SnapshotTable
//!  └─────┬──────┘                      └──────────────┘
//!        │
//!  ┌─────▼──────┐
//!  │ Bias       │
//!  └────────────┘
//! ```
//!
//! `MarketContext` wires every component from one `AnalyticsConfig`.

pub mod aggregation;
pub mod bar_cache;
pub mod bias;
pub mod config;
pub mod context;
pub mod contract_key;
pub mod events;
pub mod fetch;
pub mod field_mapper;
pub mod indicators;
pub mod metrics;
pub mod reconciler;
pub mod schema;
pub mod series;
pub mod snapshot;
pub mod stream;

pub use context::MarketContext;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
