//! Identifier types for analytics entities
//!
//! `Symbol` names an underlying instrument, `ContractKey` names one option
//! contract. Both are plain values with total ordering so they can key
//! `BTreeMap`s and produce deterministic iteration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::numeric::Strike;

/// Underlying instrument symbol (e.g., "AAPL", "SPY", "BRK.B")
///
/// Always stored upper-case and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    ///
    /// # Panics
    /// Panics if the symbol is empty after trimming
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self::try_new(symbol).expect("Symbol must not be empty")
    }

    /// Try to create a Symbol, returning None if empty or containing whitespace
    pub fn try_new(symbol: impl AsRef<str>) -> Option<Self> {
        let s = symbol.as_ref().trim();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(s.to_ascii_uppercase()))
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Parse a right code: `C`/`CALL` or `P`/`PUT` (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "C" | "CALL" => Some(OptionRight::Call),
            "P" | "PUT" => Some(OptionRight::Put),
            _ => None,
        }
    }

    /// Single-letter code used in canonical keys.
    pub fn code(&self) -> char {
        match self {
            OptionRight::Call => 'C',
            OptionRight::Put => 'P',
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionRight::Call => write!(f, "CALL"),
            OptionRight::Put => write!(f, "PUT"),
        }
    }
}

/// Canonical identifier for one option contract.
///
/// Field order defines the sort order: underlying, expiration, right, strike.
/// Two keys are equal exactly when they denote the same contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractKey {
    pub underlying: Symbol,
    pub expiration: NaiveDate,
    pub right: OptionRight,
    pub strike: Strike,
}

impl ContractKey {
    pub fn new(underlying: Symbol, expiration: NaiveDate, right: OptionRight, strike: Strike) -> Self {
        Self {
            underlying,
            expiration,
            right,
            strike,
        }
    }

    /// Canonical string form, e.g. `AAPL 2024-01-19 C 150.000`.
    pub fn canonical(&self) -> String {
        format!(
            "{} {} {} {}",
            self.underlying,
            self.expiration.format("%Y-%m-%d"),
            self.right.code(),
            self.strike
        )
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
