//! Duration strings
//!
//! Experiments write durations in humantime notation (`30s`, `1h30m`,
//! `250ms`, `2h 15m`). A single fractional value such as `1.5h` is also
//! accepted, as Kubernetes manifests commonly use it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A duration string that failed to parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationError {
    input: String,
    reason: String,
}

/// Parse a duration string such as `1h30m`, `250ms` or `1.5h`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let err = |reason: String| DurationError {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.contains('.') {
        return parse_fractional(s).ok_or_else(|| {
            err("fractions are only allowed as a single value with a unit, e.g. 1.5h".to_string())
        });
    }
    humantime::parse_duration(s).map_err(|e| err(e.to_string()))
}

/// `<decimal><unit>`, scaled by humantime's length of one `<unit>`
fn parse_fractional(s: &str) -> Option<Duration> {
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().ok()?;
    let one = humantime::parse_duration(&format!("1{unit}")).ok()?;
    Duration::try_from_secs_f64(one.as_secs_f64() * value).ok()
}

/// Format a duration the way humantime does (`1h 30m`, `45s`, `250ms`).
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    humantime::format_duration(duration).to_string()
}

/// A duration that keeps the text it was written as.
///
/// Serializes back to the original string so persisted config and status
/// read the same as the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HumanDuration {
    raw: String,
    value: Duration,
}

impl HumanDuration {
    /// The parsed duration
    #[must_use]
    pub const fn get(&self) -> Duration {
        self.value
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self {
            raw: format_duration(value),
            value,
        }
    }
}

impl FromStr for HumanDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            raw: s.trim().to_string(),
            value: parse_duration(s)?,
        })
    }
}

impl TryFrom<String> for HumanDuration {
    type Error = DurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HumanDuration> for String {
    fn from(d: HumanDuration) -> Self {
        d.raw
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2m 3s").unwrap(), Duration::from_secs(123));
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("1.5h30m").is_err());
    }

    #[test]
    fn test_parse_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "  ", "s", "30", "30x", "-5s", "1h-2m", "1..5s", "abc"] {
            assert!(parse_duration(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_error_mentions_input() {
        let err = parse_duration("10 parsecs").unwrap_err();
        assert!(err.to_string().contains("'10 parsecs'"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_formatted_duration_parses_back() {
        let d = Duration::from_secs(3661);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }

    #[test]
    fn test_human_duration_keeps_raw_text() {
        let d: HumanDuration = "1.5h".parse().unwrap();
        assert_eq!(d.get(), Duration::from_secs(5400));
        assert_eq!(d.to_string(), "1.5h");
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"1.5h\"");
    }

    #[test]
    fn test_human_duration_deserialize_rejects_invalid() {
        let result: Result<HumanDuration, _> = serde_json::from_str("\"soon\"");
        assert!(result.is_err());
    }
}
