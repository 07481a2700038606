use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How one interval advances a bucket boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Uniform advance in absolute time.
    Seconds(i64),
    /// Calendar days in the bucket timezone.
    Days(u64),
    /// Calendar months in the bucket timezone.
    Months(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "5s")]
    FiveSeconds,
    #[serde(rename = "10s")]
    TenSeconds,
    #[serde(rename = "15s")]
    FifteenSeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "1y")]
    OneYear,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::OneSecond,
        Interval::FiveSeconds,
        Interval::TenSeconds,
        Interval::FifteenSeconds,
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::SixHours,
        Interval::OneDay,
        Interval::OneWeek,
        Interval::OneMonth,
        Interval::OneYear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneSecond => "1s",
            Interval::FiveSeconds => "5s",
            Interval::TenSeconds => "10s",
            Interval::FifteenSeconds => "15s",
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::SixHours => "6h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1month",
            Interval::OneYear => "1y",
        }
    }

    pub fn step(self) -> Step {
        match self {
            Interval::OneSecond => Step::Seconds(1),
            Interval::FiveSeconds => Step::Seconds(5),
            Interval::TenSeconds => Step::Seconds(10),
            Interval::FifteenSeconds => Step::Seconds(15),
            Interval::OneMinute => Step::Seconds(60),
            Interval::FiveMinutes => Step::Seconds(5 * 60),
            Interval::FifteenMinutes => Step::Seconds(15 * 60),
            Interval::OneHour => Step::Seconds(3600),
            Interval::SixHours => Step::Seconds(6 * 3600),
            Interval::OneDay => Step::Days(1),
            Interval::OneWeek => Step::Days(7),
            Interval::OneMonth => Step::Months(1),
            Interval::OneYear => Step::Months(12),
        }
    }

    /// Longest `end - start` a query may span at this resolution.
    pub fn max_span(self) -> Duration {
        match self {
            Interval::OneSecond => Duration::hours(3),
            Interval::FifteenSeconds => Duration::hours(6),
            Interval::OneMinute => Duration::days(2),
            Interval::FifteenMinutes => Duration::days(7),
            Interval::OneHour => Duration::days(90),
            // kept for older app releases
            Interval::FiveSeconds
            | Interval::TenSeconds
            | Interval::FiveMinutes
            | Interval::SixHours => Duration::days(45),
            Interval::OneDay | Interval::OneWeek | Interval::OneMonth | Interval::OneYear => {
                Duration::days(365 * 10)
            }
        }
    }

    /// Postgres interval literal passed to `time_bucket`.
    pub fn pg_interval(self) -> &'static str {
        match self {
            Interval::OneSecond => "1 second",
            Interval::FiveSeconds => "5 seconds",
            Interval::TenSeconds => "10 seconds",
            Interval::FifteenSeconds => "15 seconds",
            Interval::OneMinute => "1 minute",
            Interval::FiveMinutes => "5 minutes",
            Interval::FifteenMinutes => "15 minutes",
            Interval::OneHour => "1 hour",
            Interval::SixHours => "6 hours",
            Interval::OneDay => "1 day",
            Interval::OneWeek => "7 days",
            Interval::OneMonth => "1 month",
            Interval::OneYear => "1 year",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == value)
            .ok_or_else(|| CoreError::validation(format!("interval not found: {value}")))
    }
}
