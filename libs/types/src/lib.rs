//! Types library for option and bar market analytics
//!
//! This library provides the core vocabulary shared by every analytics
//! component: symbols, canonical option contract keys, fixed-precision
//! strikes, OHLCV bars, and the error taxonomy.
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, OptionRight, ContractKey)
//! - `numeric`: Fixed-precision decimal types (Strike) and conversions
//! - `bar`: OHLCV bar type
//! - `errors`: Error taxonomy

pub mod ids;
pub mod numeric;
pub mod bar;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bar::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
}
