//! Error types for the analytics pipeline
//!
//! Comprehensive error taxonomy using thiserror. Every failure is local to
//! one symbol, contract, or batch; callers decide whether to log, drop, or
//! quarantine. An indicator asked for a value before its warm-up window is
//! not an error at all: it yields `None`.

use thiserror::Error;

/// Top-level analytics error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Data unavailable: {0}")]
    DataUnavailable(#[from] FetchError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// A bar series or bar record set does not have the required OHLCV shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Missing required column '{column}' in row {row}")]
    MissingColumn { column: String, row: usize },

    #[error("Invalid value for column '{column}' in row {row}: {value}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Expected {expected} series, got {actual}")]
    UnexpectedTimeframe { expected: String, actual: String },

    #[error("Timestamps not strictly increasing at index {index}")]
    Unordered { index: usize },

    #[error("Bar for {actual} in series for {expected}")]
    SymbolMismatch { expected: String, actual: String },

    #[error("Bar at index {index} violates OHLC invariants")]
    InvalidBar { index: usize },
}

/// A raw contract identifier matched none of the known formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Empty contract key")]
    Empty,

    #[error("Unrecognized contract key format: '{0}'")]
    UnrecognizedFormat(String),

    #[error("Invalid expiration date: '{0}'")]
    InvalidDate(String),

    #[error("Invalid strike: '{0}'")]
    InvalidStrike(String),

    #[error("Invalid underlying: '{0}'")]
    InvalidUnderlying(String),
}

/// A stream payload that cannot be applied to any snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Update carries no fields")]
    EmptyUpdate,

    #[error("No mappable fields in update ({dropped} dropped)")]
    NoMappableFields { dropped: usize },

    #[error("Invalid value for field '{code}': {reason}")]
    InvalidFieldValue { code: String, reason: String },

    #[error("Field '{field}' is {actual} but contract key says {expected}")]
    ContractMismatch {
        field: String,
        expected: String,
        actual: String,
    },
}

/// The batch bar-fetch collaborator could not deliver data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Bars unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },

    #[error("Fetch for {symbol} timed out")]
    Timeout { symbol: String },
}

/// Transport-level streaming failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    #[error("Stream channel closed")]
    ChannelClosed,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::MissingColumn {
            column: "close".to_string(),
            row: 3,
        };
        assert_eq!(err.to_string(), "Missing required column 'close' in row 3");
    }

    #[test]
    fn test_normalization_error_display() {
        let err = NormalizationError::UnrecognizedFormat("???".to_string());
        assert!(err.to_string().contains("???"));
    }

    #[test]
    fn test_analytics_error_from_schema_error() {
        let err: AnalyticsError = SchemaError::Unordered { index: 2 }.into();
        assert!(matches!(err, AnalyticsError::Schema(_)));
    }

    #[test]
    fn test_fetch_timeout_is_data_unavailable() {
        let err: AnalyticsError = FetchError::Timeout {
            symbol: "SPY".to_string(),
        }
        .into();
        assert!(matches!(err, AnalyticsError::DataUnavailable(_)));
        assert_eq!(err.to_string(), "Data unavailable: Fetch for SPY timed out");
    }

    #[test]
    fn test_analytics_error_from_stream_error() {
        let err: AnalyticsError = StreamError::ChannelClosed.into();
        assert!(matches!(err, AnalyticsError::Stream(_)));
        assert!(err.to_string().contains("closed"));
    }
}
