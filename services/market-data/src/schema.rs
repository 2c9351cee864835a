//! Explicit OHLCV record schema
//!
//! Batch fetch collaborators hand over loosely typed rows (JSON objects with
//! provider-specific column names and casing). Column resolution is
//! case-insensitive over a fixed alias list, and a row missing any required
//! attribute fails the whole batch with a `SchemaError` instead of quietly
//! producing an empty result.

use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use types::bar::Bar;
use types::errors::SchemaError;
use types::ids::Symbol;

/// Required columns and the names each may appear under.
pub const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "datetime", "time", "date", "t"];
pub const OPEN_ALIASES: &[&str] = &["open", "o"];
pub const HIGH_ALIASES: &[&str] = &["high", "h"];
pub const LOW_ALIASES: &[&str] = &["low", "l"];
pub const CLOSE_ALIASES: &[&str] = &["close", "c"];
pub const VOLUME_ALIASES: &[&str] = &["volume", "vol", "v"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Decode fetch rows into bars for `symbol`.
pub fn decode_bars(symbol: &Symbol, rows: &[Value]) -> Result<Vec<Bar>, SchemaError> {
    rows.iter()
        .enumerate()
        .map(|(row, value)| decode_row(symbol, row, value))
        .collect()
}

fn decode_row(symbol: &Symbol, row: usize, value: &Value) -> Result<Bar, SchemaError> {
    let record = value.as_object().ok_or_else(|| SchemaError::InvalidValue {
        column: "<row>".to_string(),
        row,
        value: value.to_string(),
    })?;

    Ok(Bar::new(
        symbol.clone(),
        timestamp_column(record, row)?,
        decimal_column(record, row, "open", OPEN_ALIASES)?,
        decimal_column(record, row, "high", HIGH_ALIASES)?,
        decimal_column(record, row, "low", LOW_ALIASES)?,
        decimal_column(record, row, "close", CLOSE_ALIASES)?,
        decimal_column(record, row, "volume", VOLUME_ALIASES)?,
    ))
}

fn lookup<'a>(record: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        record
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(alias))
            .map(|(_, v)| v)
    })
}

fn decimal_column(
    record: &Map<String, Value>,
    row: usize,
    column: &str,
    aliases: &[&str],
) -> Result<Decimal, SchemaError> {
    let value = lookup(record, aliases).ok_or_else(|| SchemaError::MissingColumn {
        column: column.to_string(),
        row,
    })?;
    let parsed = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| SchemaError::InvalidValue {
        column: column.to_string(),
        row,
        value: value.to_string(),
    })
}

fn timestamp_column(record: &Map<String, Value>, row: usize) -> Result<NaiveDateTime, SchemaError> {
    let value = lookup(record, TIMESTAMP_ALIASES).ok_or_else(|| SchemaError::MissingColumn {
        column: "timestamp".to_string(),
        row,
    })?;
    value
        .as_str()
        .and_then(|s| {
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
        })
        .ok_or_else(|| SchemaError::InvalidValue {
            column: "timestamp".to_string(),
            row,
            value: value.to_string(),
        })
}
