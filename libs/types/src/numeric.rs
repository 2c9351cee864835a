//! Fixed-precision decimal types for strikes and prices
//!
//! Prices and volumes are carried as `rust_decimal::Decimal` end to end so
//! that merging and aggregating bars is exact. Indicator math converts to
//! `f64` at the boundary via [`to_f64`].

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::NormalizationError;

/// Number of decimal places every strike is stored with.
pub const STRIKE_SCALE: u32 = 3;

/// Option strike price, always held at exactly [`STRIKE_SCALE`] decimal places.
///
/// `150`, `150.0` and `150.000` all produce the same `Strike`, so strikes from
/// different sources compare and hash identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strike(Decimal);

impl Strike {
    /// Create a strike, rejecting non-positive values and values carrying
    /// more precision than [`STRIKE_SCALE`].
    pub fn new(value: Decimal) -> Result<Self, NormalizationError> {
        if value <= Decimal::ZERO {
            return Err(NormalizationError::InvalidStrike(value.to_string()));
        }
        let normalized = value.normalize();
        if normalized.scale() > STRIKE_SCALE {
            return Err(NormalizationError::InvalidStrike(value.to_string()));
        }
        let mut fixed = normalized;
        fixed.rescale(STRIKE_SCALE);
        Ok(Self(fixed))
    }

    /// Create a strike from an integer count of thousandths (OSI encoding).
    pub fn from_thousandths(milli: i64) -> Result<Self, NormalizationError> {
        Self::new(Decimal::new(milli, STRIKE_SCALE))
    }

    /// Parse a plain decimal string (`"150"`, `"150.5"`).
    pub fn parse(s: &str) -> Result<Self, NormalizationError> {
        let valid = !s.is_empty()
            && s.chars().all(|c| c.is_ascii_digit() || c == '.')
            && s.chars().filter(|c| *c == '.').count() <= 1
            && s.chars().any(|c| c.is_ascii_digit());
        if !valid {
            return Err(NormalizationError::InvalidStrike(s.to_string()));
        }
        let value: Decimal = s
            .parse()
            .map_err(|_| NormalizationError::InvalidStrike(s.to_string()))?;
        Self::new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Strike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lossy conversion used at the indicator boundary.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}
