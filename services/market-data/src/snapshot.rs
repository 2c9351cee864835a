//! Option contract snapshots
//!
//! A snapshot is the union of every field ever observed for one contract,
//! each field stamped with the observation time of the value it holds.
//! Fields are only ever overwritten by a newer (or equally new) value for
//! the same field; an update that omits a field leaves it untouched.
//!
//! `SnapshotTable` is the read-only view handed to consumers: rows split by
//! option right, with a SHA-256 checksum over the content so a poller can
//! detect change without diffing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::{ContractKey, OptionRight};

use crate::field_mapper::{FieldValue, SemanticField};

/// A field value and when it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub value: FieldValue,
    pub updated_at: DateTime<Utc>,
}

/// Last-known-good state of one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContractSnapshot {
    pub key: ContractKey,
    pub fields: BTreeMap<SemanticField, TimestampedValue>,
    /// Observation time of the newest update that changed this snapshot.
    pub last_valid_at: DateTime<Utc>,
    /// Updates that changed at least one field.
    pub update_count: u64,
}

/// How one update's fields fared against a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Fields skipped because the stored value is newer.
    pub stale: usize,
}

impl OptionContractSnapshot {
    pub fn new(key: ContractKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
            last_valid_at: created_at,
            update_count: 0,
        }
    }

    pub fn get(&self, field: SemanticField) -> Option<&FieldValue> {
        self.fields.get(&field).map(|tv| &tv.value)
    }

    /// Numeric view of a field.
    pub fn number(&self, field: SemanticField) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn field_updated_at(&self, field: SemanticField) -> Option<DateTime<Utc>> {
        self.fields.get(&field).map(|tv| tv.updated_at)
    }

    /// Bid/ask midpoint, when both sides are known.
    pub fn mid(&self) -> Option<f64> {
        Some((self.number(SemanticField::Bid)? + self.number(SemanticField::Ask)?) / 2.0)
    }

    /// Overwrite each given field unless the stored value is newer.
    pub fn apply(
        &mut self,
        fields: BTreeMap<SemanticField, FieldValue>,
        observed_at: DateTime<Utc>,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for (field, value) in fields {
            match self.fields.get(&field) {
                Some(existing) if existing.updated_at > observed_at => outcome.stale += 1,
                _ => {
                    self.fields.insert(
                        field,
                        TimestampedValue {
                            value,
                            updated_at: observed_at,
                        },
                    );
                    outcome.applied += 1;
                }
            }
        }
        if outcome.applied > 0 {
            self.update_count += 1;
            if observed_at > self.last_valid_at {
                self.last_valid_at = observed_at;
            }
        }
        outcome
    }
}

/// Consumer view of all snapshots, split by right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub calls: Vec<OptionContractSnapshot>,
    pub puts: Vec<OptionContractSnapshot>,
    /// SHA-256 checksum of the table content.
    pub checksum: String,
}

impl SnapshotTable {
    /// Build from snapshots in key order.
    pub fn build(snapshots: impl IntoIterator<Item = OptionContractSnapshot>) -> Self {
        let (calls, puts): (Vec<_>, Vec<_>) = snapshots
            .into_iter()
            .partition(|s| s.key.right == OptionRight::Call);
        let checksum = compute_checksum(&calls, &puts);
        Self {
            calls,
            puts,
            checksum,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }

    /// Look up one row by key.
    pub fn find(&self, key: &ContractKey) -> Option<&OptionContractSnapshot> {
        let rows = match key.right {
            OptionRight::Call => &self.calls,
            OptionRight::Put => &self.puts,
        };
        rows.binary_search_by(|s| s.key.cmp(key))
            .ok()
            .map(|idx| &rows[idx])
    }
}

/// Compute a SHA-256 checksum over every row's key and timestamped fields.
///
/// Row order is key order, so equal content always hashes equally.
fn compute_checksum(calls: &[OptionContractSnapshot], puts: &[OptionContractSnapshot]) -> String {
    let mut hasher = Sha256::new();

    for rows in [calls, puts] {
        for snapshot in rows {
            hasher.update(snapshot.key.canonical().as_bytes());
            hasher.update(b"{");
            for (field, tv) in &snapshot.fields {
                hasher.update(format!("{field:?}").as_bytes());
                hasher.update(b"=");
                hasher.update(tv.value.to_string().as_bytes());
                hasher.update(b"@");
                hasher.update(tv.updated_at.timestamp_micros().to_le_bytes());
                hasher.update(b";");
            }
            hasher.update(b"}");
        }
        hasher.update(b"---");
    }

    format!("{:x}", hasher.finalize())
}

/// Verify that a table's checksum matches its content.
pub fn verify_table_integrity(table: &SnapshotTable) -> bool {
    compute_checksum(&table.calls, &table.puts) == table.checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use types::ids::Symbol;
    use types::numeric::Strike;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::seconds(secs)
    }

    fn key(right: OptionRight, strike: i64) -> ContractKey {
        ContractKey::new(
            Symbol::new("AAPL"),
            NaiveDate::from_ymd_opt(2024, 1, 19).unwrap(),
            right,
            Strike::new(Decimal::from(strike)).unwrap(),
        )
    }

    fn fields(pairs: &[(SemanticField, f64)]) -> BTreeMap<SemanticField, FieldValue> {
        pairs
            .iter()
            .map(|(f, v)| (*f, FieldValue::Number(*v)))
            .collect()
    }

    #[test]
    fn test_apply_keeps_omitted_fields() {
        let mut snap = OptionContractSnapshot::new(key(OptionRight::Call, 150), t(0));
        snap.apply(
            fields(&[(SemanticField::Bid, 1.0), (SemanticField::Ask, 1.2), (SemanticField::Delta, 0.5)]),
            t(1),
        );
        let outcome = snap.apply(fields(&[(SemanticField::Bid, 1.1)]), t(2));

        assert_eq!(outcome, ApplyOutcome { applied: 1, stale: 0 });
        assert_eq!(snap.number(SemanticField::Bid), Some(1.1));
        assert_eq!(snap.number(SemanticField::Ask), Some(1.2));
        assert_eq!(snap.number(SemanticField::Delta), Some(0.5));
        assert_eq!(snap.field_updated_at(SemanticField::Ask), Some(t(1)));
        assert_eq!(snap.field_updated_at(SemanticField::Bid), Some(t(2)));
        assert_eq!(snap.last_valid_at, t(2));
        assert_eq!(snap.update_count, 2);
    }

    #[test]
    fn test_stale_fields_are_skipped() {
        let mut snap = OptionContractSnapshot::new(key(OptionRight::Call, 150), t(0));
        snap.apply(fields(&[(SemanticField::Bid, 1.0)]), t(10));
        let outcome = snap.apply(
            fields(&[(SemanticField::Bid, 0.5), (SemanticField::Ask, 1.3)]),
            t(5),
        );

        assert_eq!(outcome, ApplyOutcome { applied: 1, stale: 1 });
        assert_eq!(snap.number(SemanticField::Bid), Some(1.0));
        assert_eq!(snap.number(SemanticField::Ask), Some(1.3));
        assert_eq!(snap.last_valid_at, t(10));
    }

    #[test]
    fn test_mid() {
        let mut snap = OptionContractSnapshot::new(key(OptionRight::Put, 150), t(0));
        assert_eq!(snap.mid(), None);
        snap.apply(fields(&[(SemanticField::Bid, 1.0), (SemanticField::Ask, 1.5)]), t(1));
        assert_eq!(snap.mid(), Some(1.25));
    }

    #[test]
    fn test_table_split_and_lookup() {
        let rows = vec![
            OptionContractSnapshot::new(key(OptionRight::Call, 150), t(0)),
            OptionContractSnapshot::new(key(OptionRight::Call, 155), t(0)),
            OptionContractSnapshot::new(key(OptionRight::Put, 150), t(0)),
        ];
        let table = SnapshotTable::build(rows);
        assert_eq!(table.calls.len(), 2);
        assert_eq!(table.puts.len(), 1);
        assert_eq!(table.len(), 3);
        assert!(table.find(&key(OptionRight::Call, 155)).is_some());
        assert!(table.find(&key(OptionRight::Put, 155)).is_none());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let mut snap = OptionContractSnapshot::new(key(OptionRight::Call, 150), t(0));
        snap.apply(fields(&[(SemanticField::Bid, 1.0)]), t(1));

        let a = SnapshotTable::build(vec![snap.clone()]);
        let b = SnapshotTable::build(vec![snap.clone()]);
        assert_eq!(a.checksum, b.checksum);
        assert!(verify_table_integrity(&a));

        snap.apply(fields(&[(SemanticField::Bid, 1.05)]), t(2));
        let c = SnapshotTable::build(vec![snap]);
        assert_ne!(a.checksum, c.checksum);

        let mut tampered = a.clone();
        tampered.checksum = "corrupted".to_string();
        assert!(!verify_table_integrity(&tampered));
    }
}
