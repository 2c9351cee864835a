//! Stream field mapping
//!
//! The stream transport delivers provider-specific field codes (numeric
//! indices in some message types, camelCase names in others). `FieldMapper`
//! is an open registry from raw code to `SemanticField` plus an optional
//! value transform; new codes are registered at runtime without touching
//! the reconciler.
//!
//! Mapping is all-or-nothing for known codes: one unparseable value rejects
//! the whole update so a malformed message is never half-applied. Unknown
//! codes are not errors; they are collected in `MappedFields::unmapped` and
//! warned about once per code.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use types::errors::ValidationError;
use types::ids::OptionRight;

/// Known option quote attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticField {
    Description,
    Bid,
    Ask,
    Last,
    Mark,
    Open,
    High,
    Low,
    Close,
    BidSize,
    AskSize,
    TotalVolume,
    OpenInterest,
    ImpliedVolatility,
    Delta,
    Gamma,
    Theta,
    Vega,
    Rho,
    Strike,
    Right,
    Underlying,
    UnderlyingPrice,
    DaysToExpiration,
}

/// Value shape expected for a field when no custom transform is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Integer,
    Text,
    Right,
}

impl SemanticField {
    pub fn kind(&self) -> FieldKind {
        match self {
            SemanticField::Description | SemanticField::Underlying => FieldKind::Text,
            SemanticField::BidSize
            | SemanticField::AskSize
            | SemanticField::TotalVolume
            | SemanticField::OpenInterest
            | SemanticField::DaysToExpiration => FieldKind::Integer,
            SemanticField::Right => FieldKind::Right,
            _ => FieldKind::Number,
        }
    }
}

/// Typed value of one semantic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Right(OptionRight),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
            FieldValue::Right(v) => write!(f, "{v}"),
        }
    }
}

/// Custom conversion from a raw value.
pub type FieldTransform = Arc<dyn Fn(&Value) -> Result<FieldValue, String> + Send + Sync>;

#[derive(Clone)]
struct FieldRule {
    field: SemanticField,
    transform: Option<FieldTransform>,
}

/// Result of mapping one raw message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedFields {
    pub fields: BTreeMap<SemanticField, FieldValue>,
    /// Codes with no registered rule, kept verbatim.
    pub unmapped: BTreeMap<String, Value>,
}

/// Registry of raw field codes.
#[derive(Default)]
pub struct FieldMapper {
    rules: BTreeMap<String, FieldRule>,
    warned: Mutex<BTreeSet<String>>,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper preloaded with the numeric and named codes of the option
    /// quote stream.
    pub fn with_default_codes() -> Self {
        use SemanticField::*;

        let mut mapper = Self::new();
        let numeric = [
            ("1", Description),
            ("2", Bid),
            ("3", Ask),
            ("4", Last),
            ("5", High),
            ("6", Low),
            ("7", Close),
            ("8", TotalVolume),
            ("9", OpenInterest),
            ("10", ImpliedVolatility),
            ("15", Open),
            ("16", BidSize),
            ("17", AskSize),
            ("20", Strike),
            ("22", Underlying),
            ("27", DaysToExpiration),
            ("28", Delta),
            ("29", Gamma),
            ("30", Theta),
            ("31", Vega),
            ("32", Rho),
            ("35", UnderlyingPrice),
            ("37", Mark),
        ];
        let named = [
            ("description", Description),
            ("bid", Bid),
            ("bidPrice", Bid),
            ("ask", Ask),
            ("askPrice", Ask),
            ("last", Last),
            ("lastPrice", Last),
            ("mark", Mark),
            ("markPrice", Mark),
            ("openPrice", Open),
            ("highPrice", High),
            ("lowPrice", Low),
            ("closePrice", Close),
            ("bidSize", BidSize),
            ("askSize", AskSize),
            ("totalVolume", TotalVolume),
            ("openInterest", OpenInterest),
            ("volatility", ImpliedVolatility),
            ("impliedVolatility", ImpliedVolatility),
            ("delta", Delta),
            ("gamma", Gamma),
            ("theta", Theta),
            ("vega", Vega),
            ("rho", Rho),
            ("strikePrice", Strike),
            ("underlying", Underlying),
            ("underlyingPrice", UnderlyingPrice),
            ("daysToExpiration", DaysToExpiration),
        ];
        for (code, field) in numeric.into_iter().chain(named) {
            mapper.register(code, field, None);
        }

        // Contract type arrives as C/P (or spelled out) and derives the right.
        let right: FieldTransform = Arc::new(|value: &Value| {
            value
                .as_str()
                .and_then(OptionRight::from_code)
                .map(FieldValue::Right)
                .ok_or_else(|| format!("expected C or P, got {value}"))
        });
        mapper.register("21", Right, Some(right.clone()));
        mapper.register("contractType", Right, Some(right.clone()));
        mapper.register("putCall", Right, Some(right));
        mapper
    }

    /// Register (or replace) the rule for `code`.
    pub fn register(
        &mut self,
        code: impl Into<String>,
        field: SemanticField,
        transform: Option<FieldTransform>,
    ) {
        self.rules
            .insert(code.into(), FieldRule { field, transform });
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.rules.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Map a raw code → value message onto semantic fields.
    ///
    /// `null` values are treated as absent. Fails with `ValidationError` if
    /// the message is empty, a known field carries an unusable value, or
    /// nothing in it maps.
    pub fn map(&self, raw: &BTreeMap<String, Value>) -> Result<MappedFields, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }

        let mut mapped = MappedFields::default();
        for (code, value) in raw {
            let Some(rule) = self.rules.get(code) else {
                self.warn_unmapped(code);
                mapped.unmapped.insert(code.clone(), value.clone());
                continue;
            };
            if value.is_null() {
                continue;
            }
            let converted = match &rule.transform {
                Some(transform) => transform(value),
                None => convert(rule.field.kind(), value),
            };
            let converted = converted.map_err(|reason| ValidationError::InvalidFieldValue {
                code: code.clone(),
                reason,
            })?;
            mapped.fields.insert(rule.field, converted);
        }

        if mapped.fields.is_empty() {
            return Err(ValidationError::NoMappableFields {
                dropped: mapped.unmapped.len(),
            });
        }
        Ok(mapped)
    }

    fn warn_unmapped(&self, code: &str) {
        let first_time = self
            .warned
            .lock()
            .map(|mut seen| seen.insert(code.to_string()))
            .unwrap_or(true);
        if first_time {
            warn!(code = %code, "Dropping unmapped stream field code");
        }
    }
}

impl fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapper")
            .field("codes", &self.rules.len())
            .finish()
    }
}

fn convert(kind: FieldKind, value: &Value) -> Result<FieldValue, String> {
    match kind {
        FieldKind::Number => number(value)
            .filter(|v| v.is_finite())
            .map(FieldValue::Number)
            .ok_or_else(|| format!("expected a number, got {value}")),
        FieldKind::Integer => number(value)
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| FieldValue::Integer(v as i64))
            .ok_or_else(|| format!("expected an integer, got {value}")),
        FieldKind::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            other => Err(format!("expected text, got {other}")),
        },
        FieldKind::Right => value
            .as_str()
            .and_then(OptionRight::from_code)
            .map(FieldValue::Right)
            .ok_or_else(|| format!("expected an option right, got {value}")),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_numeric_and_named_codes_agree() {
        let mapper = FieldMapper::with_default_codes();
        let a = mapper
            .map(&message(&[("2", json!(1.25)), ("3", json!("1.30"))]))
            .unwrap();
        let b = mapper
            .map(&message(&[("bidPrice", json!(1.25)), ("ask", json!(1.3))]))
            .unwrap();
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.fields[&SemanticField::Bid], FieldValue::Number(1.25));
    }

    #[test]
    fn test_contract_type_derives_right() {
        let mapper = FieldMapper::with_default_codes();
        let mapped = mapper
            .map(&message(&[("contractType", json!("P"))]))
            .unwrap();
        assert_eq!(
            mapped.fields[&SemanticField::Right],
            FieldValue::Right(OptionRight::Put)
        );

        let mapped = mapper.map(&message(&[("21", json!("C"))])).unwrap();
        assert_eq!(
            mapped.fields[&SemanticField::Right],
            FieldValue::Right(OptionRight::Call)
        );
    }

    #[test]
    fn test_unknown_codes_are_dropped_not_fatal() {
        let mapper = FieldMapper::with_default_codes();
        let mapped = mapper
            .map(&message(&[("2", json!(1.0)), ("999", json!("x"))]))
            .unwrap();
        assert_eq!(mapped.fields.len(), 1);
        assert_eq!(mapped.unmapped.len(), 1);
        assert!(mapped.unmapped.contains_key("999"));
    }

    #[test]
    fn test_only_unknown_codes_is_validation_error() {
        let mapper = FieldMapper::with_default_codes();
        assert_eq!(
            mapper.map(&message(&[("999", json!(1)), ("998", json!(2))])),
            Err(ValidationError::NoMappableFields { dropped: 2 })
        );
        assert_eq!(
            mapper.map(&BTreeMap::new()),
            Err(ValidationError::EmptyUpdate)
        );
    }

    #[test]
    fn test_bad_value_rejects_whole_message() {
        let mapper = FieldMapper::with_default_codes();
        let err = mapper
            .map(&message(&[("2", json!(1.0)), ("3", json!("n/a"))]))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFieldValue { ref code, .. } if code == "3"));

        assert!(mapper.map(&message(&[("bidSize", json!(1.5))])).is_err());
        assert!(mapper.map(&message(&[("contractType", json!("X"))])).is_err());
    }

    #[test]
    fn test_nulls_are_absent() {
        let mapper = FieldMapper::with_default_codes();
        let mapped = mapper
            .map(&message(&[("2", json!(1.0)), ("3", Value::Null)]))
            .unwrap();
        assert!(!mapped.fields.contains_key(&SemanticField::Ask));
    }

    #[test]
    fn test_integer_fields() {
        let mapper = FieldMapper::with_default_codes();
        let mapped = mapper
            .map(&message(&[("openInterest", json!(1200)), ("8", json!("35"))]))
            .unwrap();
        assert_eq!(
            mapped.fields[&SemanticField::OpenInterest],
            FieldValue::Integer(1200)
        );
        assert_eq!(
            mapped.fields[&SemanticField::TotalVolume],
            FieldValue::Integer(35)
        );
    }

    #[test]
    fn test_register_extends_without_reconciler_changes() {
        let mut mapper = FieldMapper::new();
        assert!(mapper.is_empty());
        let percent: FieldTransform = Arc::new(|v: &Value| {
            v.as_f64()
                .map(|p| FieldValue::Number(p / 100.0))
                .ok_or_else(|| "not a number".to_string())
        });
        mapper.register("ivPct", SemanticField::ImpliedVolatility, Some(percent));
        assert!(mapper.is_registered("ivPct"));

        let mapped = mapper.map(&message(&[("ivPct", json!(25.0))])).unwrap();
        assert_eq!(
            mapped.fields[&SemanticField::ImpliedVolatility],
            FieldValue::Number(0.25)
        );
    }
}
