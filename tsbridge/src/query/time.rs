//! Compact duration strings (`5m`, `-1h`) and timestamp rendering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TsdbError};

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^(-)?(\d+)(s|m|h|d|w)$").expect("Hard-coded regex pattern should be valid")
});

const MINUTE: u64 = 60;
const HOUR: u64 = MINUTE * 60;
const DAY: u64 = HOUR * 24;
const WEEK: u64 = DAY * 7;

/// Unit of a compact duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(TimeUnit::Second),
            "m" => Some(TimeUnit::Minute),
            "h" => Some(TimeUnit::Hour),
            "d" => Some(TimeUnit::Day),
            "w" => Some(TimeUnit::Week),
            _ => None,
        }
    }

    /// Suffix used by Flux, PromQL and the compact form.
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
        }
    }

    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => MINUTE,
            TimeUnit::Hour => HOUR,
            TimeUnit::Day => DAY,
            TimeUnit::Week => WEEK,
        }
    }

    /// Word used by Graphite's `summarize` interval argument.
    pub fn graphite_word(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
        }
    }

    /// Unit accepted by Graphite's `from`/`until` parameters.
    ///
    /// Graphite reads a bare `m` as months, so minutes are spelled `min`.
    pub fn graphite_offset(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "min",
            other => other.suffix(),
        }
    }
}

/// A positive duration such as a group-by bucket (`5m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub amount: u64,
    pub unit: TimeUnit,
}

impl Interval {
    pub fn as_secs(&self) -> u64 {
        self.amount * self.unit.seconds()
    }

    /// `5m` → `5minute`.
    pub fn graphite_word(&self) -> String {
        format!("{}{}", self.amount, self.unit.graphite_word())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for Interval {
    type Err = TsdbError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = DURATION_PATTERN
            .captures(s.trim())
            .ok_or_else(|| TsdbError::configuration(format!("invalid interval '{s}'")))?;
        if caps.get(1).is_some() {
            return Err(TsdbError::configuration(format!(
                "interval '{s}' cannot be negative"
            )));
        }
        parse_parts(s, &caps[2], &caps[3])
    }
}

/// A window ending now, e.g. `-1h` for "the last hour".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeWindow(pub Interval);

impl RelativeWindow {
    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// `-1h` form shared by Flux and the PromQL comment.
    pub fn flux(&self) -> String {
        format!("-{}", self.0)
    }

    /// `-5min` form for Graphite's `from` parameter.
    pub fn graphite(&self) -> String {
        format!("-{}{}", self.0.amount, self.0.unit.graphite_offset())
    }

    /// `end-3600s` form for RRDtool's `--start`.
    pub fn rrd(&self) -> String {
        format!("end-{}s", self.as_secs())
    }
}

impl FromStr for RelativeWindow {
    type Err = TsdbError;

    /// Accepts both `-1h` and `1h`.
    fn from_str(s: &str) -> Result<Self> {
        let caps = DURATION_PATTERN
            .captures(s.trim())
            .ok_or_else(|| TsdbError::configuration(format!("invalid relative window '{s}'")))?;
        parse_parts(s, &caps[2], &caps[3]).map(RelativeWindow)
    }
}

fn parse_parts(raw: &str, amount: &str, suffix: &str) -> Result<Interval> {
    let amount: u64 = amount
        .parse()
        .map_err(|_| TsdbError::configuration(format!("duration '{raw}' is out of range")))?;
    if amount == 0 {
        return Err(TsdbError::configuration(format!(
            "duration '{raw}' must be greater than zero"
        )));
    }
    let unit = TimeUnit::from_suffix(suffix)
        .ok_or_else(|| TsdbError::configuration(format!("unknown unit in '{raw}'")))?;
    // seconds must fit a signed unix timestamp
    match amount.checked_mul(unit.seconds()) {
        Some(secs) if secs <= i64::MAX as u64 => Ok(Interval { amount, unit }),
        _ => Err(TsdbError::configuration(format!(
            "duration '{raw}' is out of range"
        ))),
    }
}

/// RFC 3339 with second precision and a `Z` suffix (`2024-01-01T00:00:00Z`).
pub fn format_iso(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_parsing() {
        let interval: Interval = "5m".parse().unwrap();
        assert_eq!(interval.as_secs(), 300);
        assert_eq!(interval.to_string(), "5m");
        assert_eq!(interval.graphite_word(), "5minute");
        assert_eq!("1h".parse::<Interval>().unwrap().graphite_word(), "1hour");
        assert_eq!("2w".parse::<Interval>().unwrap().as_secs(), 2 * WEEK);
    }

    #[test]
    fn test_invalid_intervals() {
        assert!("5".parse::<Interval>().is_err());
        assert!("0m".parse::<Interval>().is_err());
        assert!("-5m".parse::<Interval>().is_err());
        assert!("5 minutes".parse::<Interval>().is_err());
    }

    #[test]
    fn test_out_of_range_durations() {
        let err = "99999999999999999w".parse::<Interval>().unwrap_err();
        assert!(matches!(err, TsdbError::Configuration(m) if m.contains("out of range")));
        assert!("99999999999999999999s".parse::<Interval>().is_err());
        assert!("-99999999999999999w".parse::<RelativeWindow>().is_err());

        // largest amount that still fits
        let max_weeks = i64::MAX as u64 / WEEK;
        assert!(format!("{max_weeks}w").parse::<Interval>().is_ok());
        assert!(format!("{}w", max_weeks + 1).parse::<Interval>().is_err());
    }

    #[test]
    fn test_relative_window_forms() {
        let window: RelativeWindow = "-1h".parse().unwrap();
        assert_eq!(window.flux(), "-1h");
        assert_eq!(window.graphite(), "-1h");
        assert_eq!(window.rrd(), "end-3600s");

        let window: RelativeWindow = "15m".parse().unwrap();
        assert_eq!(window.flux(), "-15m");
        assert_eq!(window.graphite(), "-15min");
        assert_eq!(window.rrd(), "end-900s");
    }

    #[test]
    fn test_format_iso() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(format_iso(&ts), "2024-01-01T12:30:00Z");
    }
}
