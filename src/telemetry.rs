use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

const MAX_VARIABLE_NAME_LEN: usize = 60;

/// A single sample as reported by a device. `t == 0` means "no device timestamp".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "n", default)]
    pub name: String,
    #[serde(rename = "u", default)]
    pub unit: String,
    #[serde(rename = "v")]
    pub value: f64,
    #[serde(rename = "t", default)]
    pub time: f64,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64, time: f64) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            value,
            time,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new("", 0.0, 0.0)
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Nameless samples only signal project liveness and never become rows.
    pub fn is_heartbeat(&self) -> bool {
        self.name.is_empty()
    }

    pub fn has_timestamp(&self) -> bool {
        self.time != 0.0
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.has_timestamp() {
            seconds_to_datetime(self.time)
        } else {
            None
        }
    }

    /// Microsecond key used to match samples against stored rows.
    pub(crate) fn time_key(&self) -> i64 {
        seconds_to_micros(self.time)
    }
}

/// Measurements reported for one project in one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementBatch {
    pub project_id: String,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl MeasurementBatch {
    pub fn new(project_id: impl Into<String>, measurements: Vec<Measurement>) -> Self {
        Self {
            project_id: project_id.into(),
            measurements,
        }
    }
}

/// Counts of rows created by an ingestion call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricResult {
    pub variables_created: i64,
    pub measurements_created: i64,
}

impl Add for MetricResult {
    type Output = MetricResult;

    fn add(self, rhs: Self) -> Self::Output {
        MetricResult {
            variables_created: self.variables_created + rhs.variables_created,
            measurements_created: self.measurements_created + rhs.measurements_created,
        }
    }
}

impl AddAssign for MetricResult {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for MetricResult {
    fn sum<I: Iterator<Item = MetricResult>>(iter: I) -> Self {
        iter.fold(MetricResult::default(), Add::add)
    }
}

/// Decodes `[{"project_id": .., "measurements": [{"n","u","v","t"}]}]`.
pub fn parse_batches(payload: &mut [u8]) -> CoreResult<Vec<MeasurementBatch>> {
    simd_json::serde::from_slice(payload)
        .map_err(|err| CoreError::validation(format!("invalid measurement payload: {err}")))
}

/// Variable names are at most 60 bytes of `[A-Za-z0-9._]`; the empty name is the heartbeat.
pub fn validate_variable_name(name: &str) -> CoreResult<()> {
    if name.len() > MAX_VARIABLE_NAME_LEN {
        return Err(CoreError::validation(format!(
            "variable name longer than {MAX_VARIABLE_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '_'))
    {
        return Err(CoreError::validation(format!(
            "variable name contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

pub(crate) fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

pub fn seconds_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(seconds_to_micros(seconds))
}

pub fn datetime_to_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}
