//! Stream update messages
//!
//! A `StreamUpdate` is one push message from the option quote stream: a raw
//! (not yet normalized) contract key plus a partial map of provider field
//! codes. Updates are transient; they are consumed into snapshot merges and
//! only retained in the quarantine log when rejected.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One partial field update for one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// Unique update identifier (UUID v7)
    pub update_id: Uuid,
    /// Contract identifier as sent by the transport
    pub contract_key_raw: String,
    /// When the transport observed the values
    pub observed_at: DateTime<Utc>,
    /// Provider field code → raw value
    pub fields: BTreeMap<String, Value>,
}

impl StreamUpdate {
    pub fn new(
        contract_key_raw: impl Into<String>,
        observed_at: DateTime<Utc>,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            update_id: Uuid::now_v7(),
            contract_key_raw: contract_key_raw.into(),
            observed_at,
            fields,
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, code: impl Into<String>, value: Value) -> Self {
        self.fields.insert(code.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a transport payload of the form
    /// `{"key": "...", "observed_at": "...", "fields": {...}}` or the flat
    /// form `{"key": "...", "<code>": <value>, ...}`.
    ///
    /// Returns `None` when the payload has no usable key. A missing or
    /// unparseable `observed_at` falls back to `received_at`.
    pub fn from_payload(payload: &Value, received_at: DateTime<Utc>) -> Option<Self> {
        let object = payload.as_object()?;
        let key = object.get("key").and_then(Value::as_str)?;
        let observed_at = object
            .get("observed_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        let fields = match object.get("fields").and_then(Value::as_object) {
            Some(nested) => nested
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => object
                .iter()
                .filter(|(k, _)| k.as_str() != "key" && k.as_str() != "observed_at")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Some(Self::new(key, observed_at, fields))
    }
}
