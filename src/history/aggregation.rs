use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    /// Time-weighted average, each sample held until the next one.
    #[serde(rename = "avgtw")]
    AvgTw,
    /// Time-weighted integral in value-hours.
    Integral,
    Count,
    Max,
    Min,
    Range,
    Sum,
    First,
    Last,
    #[serde(rename = "stddev")]
    StdDev,
    Var,
    /// Per-bucket increase of a monotonic counter.
    Diff,
    /// Per-hour rate of a monotonic counter.
    Derivate,
}

impl Aggregation {
    pub const ALL: [Aggregation; 14] = [
        Aggregation::Avg,
        Aggregation::AvgTw,
        Aggregation::Integral,
        Aggregation::Count,
        Aggregation::Max,
        Aggregation::Min,
        Aggregation::Range,
        Aggregation::Sum,
        Aggregation::First,
        Aggregation::Last,
        Aggregation::StdDev,
        Aggregation::Var,
        Aggregation::Diff,
        Aggregation::Derivate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::AvgTw => "avgtw",
            Aggregation::Integral => "integral",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Range => "range",
            Aggregation::Sum => "sum",
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::StdDev => "stddev",
            Aggregation::Var => "var",
            Aggregation::Diff => "diff",
            Aggregation::Derivate => "derivate",
        }
    }

    pub fn is_counter(self) -> bool {
        matches!(self, Aggregation::Diff | Aggregation::Derivate)
    }

    /// Per-bucket reduction actually evaluated by the store. Counter queries read the last value.
    pub fn bucket_reduction(self) -> Aggregation {
        if self.is_counter() {
            Aggregation::Last
        } else {
            self
        }
    }

    /// SQL over `time` and `value` of the raw measurements table.
    pub fn sql_expression(self) -> &'static str {
        match self.bucket_reduction() {
            Aggregation::Avg => "avg(value)",
            Aggregation::AvgTw => "average(time_weight('LOCF', time, value))",
            Aggregation::Integral => "integral(time_weight('LOCF', time, value), 'hour')",
            Aggregation::Count => "count(value)",
            Aggregation::Max => "max(value)",
            Aggregation::Min => "min(value)",
            Aggregation::Range => "max(value) - min(value)",
            Aggregation::Sum => "sum(value)",
            Aggregation::First => "first(value, time)",
            Aggregation::StdDev => "stddev_samp(value)",
            Aggregation::Var => "var_samp(value)",
            Aggregation::Last | Aggregation::Diff | Aggregation::Derivate => "last(value, time)",
        }
    }

    /// Column of a rollup view holding this reduction.
    pub fn rollup_column(self) -> &'static str {
        self.bucket_reduction().as_str()
    }

    /// Reduces the samples of one bucket. `samples` must be ordered by time.
    pub fn reduce(self, samples: &[(DateTime<Utc>, f64)]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let values = samples.iter().map(|(_, value)| *value);
        let count = samples.len() as f64;
        match self.bucket_reduction() {
            Aggregation::Avg => Some(values.sum::<f64>() / count),
            Aggregation::AvgTw => time_weighted_average(samples),
            Aggregation::Integral => Some(time_weighted_integral_hours(samples)),
            Aggregation::Count => Some(count),
            Aggregation::Max => values.reduce(f64::max),
            Aggregation::Min => values.reduce(f64::min),
            Aggregation::Range => {
                let max = samples.iter().map(|(_, v)| *v).reduce(f64::max)?;
                let min = samples.iter().map(|(_, v)| *v).reduce(f64::min)?;
                Some(max - min)
            }
            Aggregation::Sum => Some(values.sum()),
            Aggregation::First => samples.first().map(|(_, value)| *value),
            Aggregation::StdDev => sample_variance(samples).map(f64::sqrt),
            Aggregation::Var => sample_variance(samples),
            Aggregation::Last | Aggregation::Diff | Aggregation::Derivate => {
                samples.last().map(|(_, value)| *value)
            }
        }
    }
}

fn time_weighted_integral_hours(samples: &[(DateTime<Utc>, f64)]) -> f64 {
    samples
        .windows(2)
        .map(|pair| {
            let held = (pair[1].0 - pair[0].0).num_microseconds().unwrap_or(0) as f64 / 1e6;
            pair[0].1 * held / SECONDS_PER_HOUR
        })
        .sum()
}

fn time_weighted_average(samples: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    let (first, last) = (samples.first()?, samples.last()?);
    let total_hours =
        (last.0 - first.0).num_microseconds().unwrap_or(0) as f64 / 1e6 / SECONDS_PER_HOUR;
    if total_hours <= 0.0 {
        // a single instant carries no weight; fall back to its value
        return Some(samples.iter().map(|(_, v)| *v).sum::<f64>() / samples.len() as f64);
    }
    Some(time_weighted_integral_hours(samples) / total_hours)
}

fn sample_variance(samples: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|(_, v)| *v).sum::<f64>() / n;
    let squares = samples
        .iter()
        .map(|(_, v)| (v - mean) * (v - mean))
        .sum::<f64>();
    Some(squares / (n - 1.0))
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Aggregation::ALL
            .into_iter()
            .find(|aggregation| aggregation.as_str() == value)
            .ok_or_else(|| CoreError::validation(format!("invalid aggregation: {value}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingValueStrategy {
    #[default]
    None,
    /// Last observation carried forward.
    Locf,
}

impl FromStr for MissingValueStrategy {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(MissingValueStrategy::None),
            "locf" => Ok(MissingValueStrategy::Locf),
            other => Err(CoreError::validation(format!(
                "invalid missing value strategy: {other}"
            ))),
        }
    }
}
