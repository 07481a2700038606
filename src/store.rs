use crate::error::CoreResult;
use crate::history::aggregation::Aggregation;
use crate::history::interval::Interval;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

mod memory;
mod postgres;

pub use memory::MemoryMeasurementStore;
pub use postgres::PgMeasurementStore;

/// Outcome of registering a variable name for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableInsert {
    Created(i32),
    /// Another writer registered the name first.
    Existing(i32),
}

impl VariableInsert {
    pub fn id(self) -> i32 {
        match self {
            VariableInsert::Created(id) | VariableInsert::Existing(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub variable_id: i32,
    pub time: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSource {
    /// Aggregate raw rows on the fly.
    Raw,
    /// Read a precomputed view by name.
    Rollup(String),
}

/// A bucketed read over `[start, end]`.
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub variable_id: i32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
    pub aggregation: Aggregation,
    pub timezone: Tz,
    pub source: SeriesSource,
}

/// The authoritative relational store.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn find_variable(&self, project: &str, name: &str) -> CoreResult<Option<i32>>;

    /// Registers `name`, tolerating a concurrent registration of the same name.
    async fn insert_variable(&self, project: &str, name: &str) -> CoreResult<VariableInsert>;

    async fn count_variables(&self, project: &str) -> CoreResult<usize>;

    /// `(variable, time)` pairs already stored for `variable_ids` within `[start, end]`.
    async fn existing_times(
        &self,
        variable_ids: &[i32],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<(i32, DateTime<Utc>)>>;

    /// Inserts rows, skipping `(variable, time)` pairs that already exist. Returns rows written.
    async fn insert_measurements(&self, rows: &[MeasurementRow]) -> CoreResult<u64>;

    async fn last_measurement(&self, variable_id: i32) -> CoreResult<Option<Observation>>;

    /// Newest raw row strictly before `before` and strictly after `since`.
    async fn last_measurement_before(
        &self,
        variable_id: i32,
        before: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>>;

    /// Newest rollup bucket at or before `before`, reading the column for `aggregation`.
    async fn last_rollup_before(
        &self,
        variable_id: i32,
        view: &str,
        aggregation: Aggregation,
        before: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>>;

    /// Sparse `(bucket, value)` rows ordered by bucket.
    async fn bucketed_series(
        &self,
        query: &SeriesQuery,
    ) -> CoreResult<Vec<(DateTime<Utc>, Option<f64>)>>;
}
