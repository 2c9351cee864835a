//! Option contract key normalization
//!
//! Batch fetches, the stream transport, and user input all name contracts
//! differently. `normalize` maps every recognized spelling onto a single
//! `ContractKey` and fails with `NormalizationError` on anything else, so a
//! caller can quarantine an update instead of keying it wrong.
//!
//! Recognized formats (case-insensitive, optional leading `.`):
//!
//! | Format            | Example                           |
//! |-------------------|-----------------------------------|
//! | OSI compact       | `AAPL240119C00150000`             |
//! | OSI padded        | `AAPL  240119C00150000`           |
//! | Compact decimal   | `AAPL240119C150`                  |
//! | Underscore        | `AAPL_011924C150`                 |
//! | Spaced            | `AAPL 2024-01-19 C 150`           |
//! | Spaced, combined  | `AAPL 20240119 C150`              |
//!
//! Spaced fields may be separated by whitespace, `|`, or `,`; the right and
//! strike may appear in either order and the right may be spelled out.
//! Spaced dates accept `YYYY-MM-DD`, `YYYYMMDD`, `YYMMDD`, and `MM/DD/YYYY`.

use chrono::NaiveDate;
use types::errors::NormalizationError;
use types::ids::{ContractKey, OptionRight, Symbol};
use types::numeric::Strike;

/// Normalize a raw contract identifier. Pure and total.
pub fn normalize(raw: &str) -> Result<ContractKey, NormalizationError> {
    let cleaned = raw.trim().to_ascii_uppercase();
    let cleaned = cleaned.strip_prefix('.').unwrap_or(cleaned.as_str());
    if cleaned.is_empty() {
        return Err(NormalizationError::Empty);
    }

    let tokens: Vec<&str> = cleaned
        .split(|c: char| c.is_whitespace() || c == '|' || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.as_slice() {
        [single] if single.contains('_') => parse_underscore(single, raw),
        [single] => parse_compact(single, raw),
        [underlying, body] => {
            let key = parse_compact(&format!("{underlying}{body}"), raw)?;
            // The padded form must split exactly at the underlying.
            if key.underlying.as_str() != *underlying {
                return Err(unrecognized(raw));
            }
            Ok(key)
        }
        [underlying, date, right_strike] => {
            let (right, strike) = split_right_strike(right_strike).ok_or_else(|| unrecognized(raw))?;
            Ok(ContractKey::new(
                parse_underlying(underlying)?,
                parse_spaced_date(date)?,
                right,
                parse_strike(strike)?,
            ))
        }
        [underlying, date, a, b] => {
            let (right, strike) = match (OptionRight::from_code(a), OptionRight::from_code(b)) {
                (Some(right), None) => (right, *b),
                (None, Some(right)) => (right, *a),
                _ => return Err(unrecognized(raw)),
            };
            Ok(ContractKey::new(
                parse_underlying(underlying)?,
                parse_spaced_date(date)?,
                right,
                parse_strike(strike)?,
            ))
        }
        _ => Err(unrecognized(raw)),
    }
}

fn unrecognized(raw: &str) -> NormalizationError {
    NormalizationError::UnrecognizedFormat(raw.trim().to_string())
}

/// `UNDERLYING` + `YYMMDD` + `C|P` + strike, split at the first position
/// where six digits are followed by a right code.
fn parse_compact(token: &str, raw: &str) -> Result<ContractKey, NormalizationError> {
    let bytes = token.as_bytes();
    let split = (1..bytes.len().saturating_sub(7))
        .find(|&i| {
            bytes[i..i + 6].iter().all(u8::is_ascii_digit) && matches!(bytes[i + 6], b'C' | b'P')
        })
        .ok_or_else(|| unrecognized(raw))?;

    let underlying = parse_underlying(&token[..split])?;
    let expiration = parse_yymmdd(&token[split..split + 6])?;
    let right = OptionRight::from_code(&token[split + 6..split + 7]).ok_or_else(|| unrecognized(raw))?;
    let strike = parse_strike(&token[split + 7..])?;
    Ok(ContractKey::new(underlying, expiration, right, strike))
}

/// `UNDERLYING_MMDDYY` + `C|P` + strike.
fn parse_underscore(token: &str, raw: &str) -> Result<ContractKey, NormalizationError> {
    let (underlying, rest) = token.split_once('_').ok_or_else(|| unrecognized(raw))?;
    if rest.len() < 8 || !rest.is_char_boundary(6) || !rest.is_char_boundary(7) {
        return Err(unrecognized(raw));
    }
    let date = &rest[..6];
    if !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NormalizationError::InvalidDate(date.to_string()));
    }
    let expiration = ymd(&date[4..6], &date[..2], &date[2..4], date)?;
    let right = OptionRight::from_code(&rest[6..7]).ok_or_else(|| unrecognized(raw))?;
    Ok(ContractKey::new(
        parse_underlying(underlying)?,
        expiration,
        right,
        parse_strike(&rest[7..])?,
    ))
}

/// `C150`, `P150.5`, `CALL150`.
fn split_right_strike(token: &str) -> Option<(OptionRight, &str)> {
    ["CALL", "PUT", "C", "P"].iter().find_map(|prefix| {
        token
            .strip_prefix(prefix)
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .and_then(|rest| OptionRight::from_code(prefix).map(|right| (right, rest)))
    })
}

fn parse_underlying(s: &str) -> Result<Symbol, NormalizationError> {
    let valid = s.starts_with(|c: char| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
    if !valid {
        return Err(NormalizationError::InvalidUnderlying(s.to_string()));
    }
    Symbol::try_new(s).ok_or_else(|| NormalizationError::InvalidUnderlying(s.to_string()))
}

/// Eight digits is the OSI thousandths encoding; anything else is decimal.
fn parse_strike(s: &str) -> Result<Strike, NormalizationError> {
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let milli: i64 = s
            .parse()
            .map_err(|_| NormalizationError::InvalidStrike(s.to_string()))?;
        return Strike::from_thousandths(milli);
    }
    Strike::parse(s)
}

fn parse_yymmdd(s: &str) -> Result<NaiveDate, NormalizationError> {
    ymd(&s[..2], &s[2..4], &s[4..6], s)
}

fn parse_spaced_date(s: &str) -> Result<NaiveDate, NormalizationError> {
    let invalid = || NormalizationError::InvalidDate(s.to_string());
    if let Some((m, rest)) = s.split_once('/') {
        let (d, y) = rest.split_once('/').ok_or_else(invalid)?;
        if y.len() != 4 {
            return Err(invalid());
        }
        return ymd(y, m, d, s);
    }
    if s.contains('-') {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid());
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match s.len() {
        8 => ymd(&s[..4], &s[4..6], &s[6..8], s),
        6 => parse_yymmdd(s),
        _ => Err(invalid()),
    }
}

/// Build a date from year/month/day digit strings; two-digit years are 20YY.
fn ymd(year: &str, month: &str, day: &str, raw: &str) -> Result<NaiveDate, NormalizationError> {
    let invalid = || NormalizationError::InvalidDate(raw.to_string());
    let mut y: i32 = year.parse().map_err(|_| invalid())?;
    if year.len() == 2 {
        y += 2000;
    }
    let m: u32 = month.parse().map_err(|_| invalid())?;
    let d: u32 = day.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid)
}
