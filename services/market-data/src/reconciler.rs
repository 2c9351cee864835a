//! Stream reconciliation
//!
//! Folds partial stream updates into per-contract snapshots. Each update is
//! normalized and mapped before any lock is taken; only the field writes
//! happen under the write lock, so a reader always sees a snapshot either
//! before or after an update, never in between.
//!
//! Failure is local to one update:
//! - unrecognized contract key → quarantined, no snapshot touched
//! - malformed field payload → rejected, no snapshot touched
//! - a right, strike, or underlying field contradicting the key → rejected
//!
//! Snapshots persist until the caller removes or expires them; a gap in the
//! stream never shrinks the table.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::errors::{NormalizationError, ValidationError};
use types::ids::ContractKey;
use types::numeric::to_f64;
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::contract_key::normalize;
use crate::events::StreamUpdate;
use crate::field_mapper::{FieldMapper, FieldValue, SemanticField};
use crate::metrics::AnalyticsMetrics;
use crate::snapshot::{OptionContractSnapshot, SnapshotTable};

/// Why an update was not merged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeRejection {
    #[error("quarantined: {0}")]
    Quarantined(#[from] NormalizationError),

    #[error("invalid update: {0}")]
    Invalid(#[from] ValidationError),
}

/// Result of merging one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub key: ContractKey,
    /// The update created the snapshot.
    pub created: bool,
    pub applied: usize,
    pub stale: usize,
    /// Field codes with no mapping rule.
    pub unmapped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Normalization,
    Validation,
}

/// A rejected update kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedUpdate {
    pub update_id: Uuid,
    pub contract_key_raw: String,
    pub observed_at: DateTime<Utc>,
    pub kind: RejectionKind,
    pub reason: String,
}

#[derive(Debug, Default)]
struct ReconcilerState {
    snapshots: BTreeMap<ContractKey, OptionContractSnapshot>,
    quarantine: VecDeque<QuarantinedUpdate>,
}

/// Owner of all option contract snapshots.
pub struct StreamReconciler {
    mapper: FieldMapper,
    config: ReconcilerConfig,
    state: RwLock<ReconcilerState>,
    metrics: Arc<AnalyticsMetrics>,
}

impl StreamReconciler {
    pub fn new(mapper: FieldMapper, config: ReconcilerConfig, metrics: Arc<AnalyticsMetrics>) -> Self {
        info!(
            codes = mapper.len(),
            quarantine_capacity = config.quarantine_capacity,
            "StreamReconciler initialized"
        );
        Self {
            mapper,
            config,
            state: RwLock::new(ReconcilerState::default()),
            metrics,
        }
    }

    /// Reconciler with the default field codes and configuration.
    pub fn with_defaults() -> Self {
        Self::new(
            FieldMapper::with_default_codes(),
            ReconcilerConfig::default(),
            Arc::new(AnalyticsMetrics::new()),
        )
    }

    pub fn metrics(&self) -> &Arc<AnalyticsMetrics> {
        &self.metrics
    }

    fn read(&self) -> RwLockReadGuard<'_, ReconcilerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ReconcilerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge one update into its contract's snapshot.
    ///
    /// Only the fields present in the update are written, each unless the
    /// stored value was observed later. A rejected update leaves every
    /// snapshot exactly as it was.
    pub fn merge_update(&self, update: StreamUpdate) -> Result<MergeOutcome, MergeRejection> {
        let key = match normalize(&update.contract_key_raw) {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    update_id = %update.update_id,
                    raw_key = %update.contract_key_raw,
                    error = %e,
                    "Quarantining update with unrecognized contract key"
                );
                self.metrics.record_update_quarantined();
                self.quarantine(&update, RejectionKind::Normalization, e.to_string());
                return Err(e.into());
            }
        };

        let mapped = match self
            .mapper
            .map(&update.fields)
            .and_then(|mapped| check_identity(&key, &mapped.fields).map(|()| mapped))
        {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(
                    update_id = %update.update_id,
                    contract = %key,
                    error = %e,
                    "Dropping malformed update"
                );
                self.metrics.record_update_rejected();
                self.quarantine(&update, RejectionKind::Validation, e.to_string());
                return Err(e.into());
            }
        };
        let unmapped = mapped.unmapped.len();

        let (created, applied) = {
            let mut state = self.write();
            let mut created = false;
            let snapshot = state.snapshots.entry(key.clone()).or_insert_with(|| {
                created = true;
                OptionContractSnapshot::new(key.clone(), update.observed_at)
            });
            (created, snapshot.apply(mapped.fields, update.observed_at))
        };

        self.metrics.record_update_merged(applied.stale);
        if applied.stale > 0 {
            debug!(
                contract = %key,
                stale = applied.stale,
                observed_at = %update.observed_at,
                "Skipped out-of-order field values"
            );
        }

        Ok(MergeOutcome {
            key,
            created,
            applied: applied.applied,
            stale: applied.stale,
            unmapped,
        })
    }

    fn quarantine(&self, update: &StreamUpdate, kind: RejectionKind, reason: String) {
        let capacity = self.config.quarantine_capacity;
        if capacity == 0 {
            return;
        }
        let mut state = self.write();
        if state.quarantine.len() >= capacity {
            state.quarantine.pop_front();
        }
        state.quarantine.push_back(QuarantinedUpdate {
            update_id: update.update_id,
            contract_key_raw: update.contract_key_raw.clone(),
            observed_at: update.observed_at,
            kind,
            reason,
        });
    }

    /// Copy of one contract's snapshot.
    pub fn snapshot(&self, key: &ContractKey) -> Option<OptionContractSnapshot> {
        self.read().snapshots.get(key).cloned()
    }

    /// Look up a snapshot by any recognized key spelling.
    pub fn snapshot_by_raw(&self, raw: &str) -> Result<Option<OptionContractSnapshot>, NormalizationError> {
        let key = normalize(raw)?;
        Ok(self.snapshot(&key))
    }

    /// Copies of every snapshot in key order.
    pub fn all_snapshots(&self) -> Vec<OptionContractSnapshot> {
        self.read().snapshots.values().cloned().collect()
    }

    /// Consumer table, split by right and checksummed.
    pub fn snapshot_table(&self) -> SnapshotTable {
        SnapshotTable::build(self.all_snapshots())
    }

    pub fn len(&self) -> usize {
        self.read().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().snapshots.is_empty()
    }

    /// Rejected updates, oldest first.
    pub fn quarantined(&self) -> Vec<QuarantinedUpdate> {
        self.read().quarantine.iter().cloned().collect()
    }

    /// Drop snapshots not updated since `cutoff`; returns how many.
    pub fn expire_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.write();
        let before = state.snapshots.len();
        state.snapshots.retain(|_, s| s.last_valid_at >= cutoff);
        let expired = before - state.snapshots.len();
        if expired > 0 {
            info!(expired, cutoff = %cutoff, "Expired stale option snapshots");
        }
        expired
    }

    pub fn remove(&self, key: &ContractKey) -> Option<OptionContractSnapshot> {
        self.write().snapshots.remove(key)
    }
}

/// Strikes are stored to thousandths.
const STRIKE_TOLERANCE: f64 = 0.0005;

/// Reject fields that restate the contract's identity differently than its key.
fn check_identity(
    key: &ContractKey,
    fields: &BTreeMap<SemanticField, FieldValue>,
) -> Result<(), ValidationError> {
    let mismatch = |field: SemanticField, expected: String, actual: &FieldValue| {
        ValidationError::ContractMismatch {
            field: format!("{field:?}"),
            expected,
            actual: actual.to_string(),
        }
    };

    if let Some(value) = fields.get(&SemanticField::Right) {
        if *value != FieldValue::Right(key.right) {
            return Err(mismatch(SemanticField::Right, key.right.to_string(), value));
        }
    }
    if let Some(value) = fields.get(&SemanticField::Strike) {
        let strike = to_f64(key.strike.as_decimal());
        if !value.as_f64().is_some_and(|v| (v - strike).abs() < STRIKE_TOLERANCE) {
            return Err(mismatch(SemanticField::Strike, key.strike.to_string(), value));
        }
    }
    if let Some(value) = fields.get(&SemanticField::Underlying) {
        let same = match value {
            FieldValue::Text(text) => text.trim().eq_ignore_ascii_case(key.underlying.as_str()),
            _ => false,
        };
        if !same {
            return Err(mismatch(
                SemanticField::Underlying,
                key.underlying.to_string(),
                value,
            ));
        }
    }
    Ok(())
}

impl std::fmt::Debug for StreamReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReconciler")
            .field("snapshots", &self.len())
            .field("mapper", &self.mapper)
            .finish()
    }
}
