//! Human-readable duration parsing.
//!
//! Turns strings like "5 seconds" or "15 minutes" into integer
//! milliseconds. The accepted shape is `<integer> <unit>` -- whitespace
//! tolerant, unit case-insensitive, singular or plural.

use thiserror::Error;

/// Errors from duration parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// The string does not match `<integer> <unit>`.
    #[error("invalid duration: '{0}'")]
    InvalidDuration(String),

    /// The unit is not one of millisecond/second/minute/hour/day.
    #[error("unknown duration unit: '{0}'")]
    UnknownUnit(String),

    /// The value overflows 64-bit millisecond arithmetic.
    #[error("duration '{0}' overflows the supported range")]
    Overflow(String),
}

/// Parse a duration string into milliseconds.
///
/// Supported units (case-insensitive, optional trailing `s`):
/// `millisecond`, `second`, `minute`, `hour`, `day`.
///
/// ```
/// use duraflow_core::duration::parse_duration;
///
/// assert_eq!(parse_duration("5 seconds").unwrap(), 5_000);
/// assert_eq!(parse_duration("15 minutes").unwrap(), 900_000);
/// ```
pub fn parse_duration(input: &str) -> Result<i64, DurationError> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let [amount, unit] = parts.as_slice() else {
        return Err(DurationError::InvalidDuration(input.to_string()));
    };

    // Negative counts are a shape error: the grammar only admits digits.
    if !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DurationError::InvalidDuration(input.to_string()));
    }
    // All digits but too large for i64: a well-formed value out of range.
    let n: i64 = amount
        .parse()
        .map_err(|_| DurationError::Overflow(input.to_string()))?;

    let lower = unit.to_lowercase();
    let per_unit: i64 = match lower.trim_end_matches('s') {
        "millisecond" => 1,
        "second" => 1_000,
        "minute" => 60_000,
        "hour" => 3_600_000,
        "day" => 86_400_000,
        _ => return Err(DurationError::UnknownUnit(unit.to_string())),
    };

    n.checked_mul(per_unit)
        .ok_or_else(|| DurationError::Overflow(input.to_string()))
}
