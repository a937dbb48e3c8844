//! The pool duration grammar.
//!
//! Claim lifetimes are written as a sum of whole-unit terms using `d`
//! (days), `h` (hours), and `m` (minutes): `2h`, `30m`, `1d12h`, `2h30m`.
//! The store only accepts hour/minute units back, so formatting folds
//! days into hours.

use chrono::Duration;
use thiserror::Error;

/// Duration grammar errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    /// A unit appeared with no digits in front of it, or a number was
    /// out of range.
    #[error("invalid duration: {0}")]
    Invalid(String),

    /// An unknown unit character.
    #[error("invalid duration unit '{unit}' in: {input}")]
    InvalidUnit { unit: char, input: String },

    /// The string ended with digits that were never given a unit.
    #[error("invalid duration (trailing number without unit): {0}")]
    TrailingDigits(String),
}

/// Parse a duration string composed of `Nd`, `Nh`, and `Nm` terms.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let mut total = Duration::zero();
    let mut digits = String::new();

    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        let term = match c {
            'd' => Duration::try_days(n),
            'h' => Duration::try_hours(n),
            'm' => Duration::try_minutes(n),
            other => {
                return Err(DurationError::InvalidUnit {
                    unit: other,
                    input: input.to_string(),
                })
            }
        };
        total = term
            .and_then(|t| total.checked_add(&t))
            .ok_or_else(|| DurationError::Invalid(input.to_string()))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(DurationError::TrailingDigits(input.to_string()));
    }
    Ok(total)
}

/// Format a duration using `h` and `m` terms only.
///
/// Non-positive durations render as `0m`; positive durations shorter
/// than a minute round up to `1m` so a freshly extended lifetime never
/// collapses to zero.
pub fn format_duration(duration: Duration) -> String {
    if duration <= Duration::zero() {
        return "0m".to_string();
    }
    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if out.is_empty() {
        out.push_str("1m");
    }
    out
}

/// Render an age for human consumption: `Ns`, `Nm`, `Nh`, `NhMm`, `Nd`,
/// or `NdMh`.
pub fn format_age(age: Duration) -> String {
    if age < Duration::minutes(1) {
        return format!("{}s", age.num_seconds().max(0));
    }
    let days = age.num_hours() / 24;
    let hours = age.num_hours() % 24;
    let minutes = age.num_minutes() % 60;

    if days > 0 {
        if hours > 0 {
            return format!("{days}d{hours}h");
        }
        return format!("{days}d");
    }
    if hours > 0 {
        if minutes > 0 {
            return format!("{hours}h{minutes}m");
        }
        return format!("{hours}h");
    }
    format!("{minutes}m")
}
