//! Duration literals (`7d`, `24h`, `2w`, `1m`, `1y`).
//!
//! Values are resolved against a caller-supplied reference instant so tests
//! can inject a fixed "now". A month is 30 days and a year 365; a day is
//! exactly 24 hours.

use chrono::{DateTime, Duration, Utc};

/// Errors from duration parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("empty duration")]
    Empty,

    #[error("duration '{0}' has no numeric part")]
    MissingNumber(String),

    #[error("duration '{0}' has an unknown unit '{1}'")]
    UnknownUnit(String, String),

    #[error("duration '{0}' is out of range")]
    OutOfRange(String),
}

/// Returns `true` if `s` looks like a duration literal (digits + unit).
pub fn is_duration(s: &str) -> bool {
    parse_duration(s).is_ok()
}

/// Parses a duration literal into a [`chrono::Duration`].
pub fn parse_duration(s: &str) -> Result<Duration, TimeParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeParseError::Empty);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| TimeParseError::UnknownUnit(s.to_owned(), String::new()))?;
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(TimeParseError::MissingNumber(s.to_owned()));
    }
    let n: i64 = digits
        .parse()
        .map_err(|_| TimeParseError::OutOfRange(s.to_owned()))?;

    let hours = match unit {
        "h" => n.checked_mul(1),
        "d" => n.checked_mul(24),
        "w" => n.checked_mul(24 * 7),
        "m" => n.checked_mul(24 * 30),
        "y" => n.checked_mul(24 * 365),
        other => {
            return Err(TimeParseError::UnknownUnit(
                s.to_owned(),
                other.to_owned(),
            ));
        }
    }
    .ok_or_else(|| TimeParseError::OutOfRange(s.to_owned()))?;

    Duration::try_hours(hours).ok_or_else(|| TimeParseError::OutOfRange(s.to_owned()))
}

/// Resolves a duration literal against a reference instant: `7d` at `now`
/// is exactly `now - 7*24h`.
pub fn resolve_ago(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeParseError> {
    Ok(now - parse_duration(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        "2025-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn seven_days_is_exactly_168_hours() {
        let resolved = resolve_ago("7d", t0()).unwrap();
        assert_eq!(t0() - resolved, Duration::hours(7 * 24));
    }

    #[test]
    fn all_units() {
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("2w").unwrap(), Duration::days(14));
        assert_eq!(parse_duration("1m").unwrap(), Duration::days(30));
        assert_eq!(parse_duration("1y").unwrap(), Duration::days(365));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(TimeParseError::Empty));
        assert!(matches!(
            parse_duration("d"),
            Err(TimeParseError::MissingNumber(_))
        ));
        assert!(matches!(
            parse_duration("7x"),
            Err(TimeParseError::UnknownUnit(_, _))
        ));
        assert!(matches!(
            parse_duration("7"),
            Err(TimeParseError::UnknownUnit(_, _))
        ));
    }

    #[test]
    fn is_duration_probe() {
        assert!(is_duration("7d"));
        assert!(!is_duration("open"));
        assert!(!is_duration("7"));
    }
}
