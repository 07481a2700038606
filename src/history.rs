//! Bucketed history reads.
//!
//! A read picks one of two branches. Counter aggregations (`diff`, `derivate`) read the last value
//! of every bucket, clamp dips, carry values forward and difference neighbouring buckets. Every
//! other aggregation reads a rollup view when one exists for the interval in an equivalent
//! timezone, otherwise it aggregates raw rows, and the result is laid onto the full bucket grid.

pub mod aggregation;
pub mod buckets;
pub mod interval;
pub mod rollup;
pub mod series;
pub mod timezone;

#[cfg(test)]
mod tests;

use self::aggregation::{Aggregation, MissingValueStrategy};
use self::buckets::{generate_buckets, shift_by_intervals};
use self::interval::Interval;
use self::series::{
    correct_monotonic, differences, fill_forward, merge_onto_buckets, rates_per_hour, to_wire,
    DataPoint,
};
use crate::error::{CoreError, CoreResult};
use crate::service::MeasurementService;
use crate::store::{SeriesQuery, SeriesSource};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOptions {
    pub project_id: String,
    pub variable: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub missing_value_strategy: MissingValueStrategy,
    pub timezone: Tz,
}

impl HistoryOptions {
    /// Decodes a JSON request; shape errors become validation errors.
    pub fn from_json(payload: &mut [u8]) -> CoreResult<Self> {
        simd_json::serde::from_slice(payload)
            .map_err(|err| CoreError::validation(format!("invalid history request: {err}")))
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.start >= self.end {
            return Err(CoreError::validation("start must be before end"));
        }
        if self.end - self.start > self.interval.max_span() {
            return Err(CoreError::validation(format!(
                "time range too long for interval {}",
                self.interval
            )));
        }
        Ok(())
    }
}

impl MeasurementService {
    /// One point per bucket of `[start, end]`, or one point fewer for counter aggregations read
    /// without a rollup.
    pub async fn history(&self, options: &HistoryOptions) -> CoreResult<Vec<DataPoint>> {
        options.validate()?;

        let variable_id = self
            .registry
            .lookup(&options.project_id, &options.variable)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "variable {} in project {}",
                    options.variable, options.project_id
                ))
            })?;

        if options.aggregation.is_counter() {
            return self.counter_history(variable_id, options).await;
        }

        let mut points = self
            .bucketed(
                variable_id,
                options.start,
                options.end,
                options.interval,
                options.aggregation,
                options.timezone,
            )
            .await?;
        if options.missing_value_strategy == MissingValueStrategy::Locf {
            fill_forward(&mut points);
        }
        Ok(points)
    }

    /// [`MeasurementService::history`] as `[[unix_seconds, value], ..]`.
    pub async fn history_wire(&self, options: &HistoryOptions) -> CoreResult<Vec<(i64, f64)>> {
        Ok(to_wire(&self.history(options).await?))
    }

    async fn counter_history(
        &self,
        variable_id: i32,
        options: &HistoryOptions,
    ) -> CoreResult<Vec<DataPoint>> {
        // a rollup provides the bucket before `start`, so the first requested bucket gets a delta
        let start = if self.rollups.has(options.interval) {
            shift_by_intervals(options.start, options.interval, -1, options.timezone)?
        } else {
            options.start
        };

        let mut points = self
            .bucketed(
                variable_id,
                start,
                options.end,
                options.interval,
                Aggregation::Last,
                options.timezone,
            )
            .await?;
        correct_monotonic(&mut points);
        fill_forward(&mut points);

        Ok(match options.aggregation {
            Aggregation::Derivate => rates_per_hour(&points),
            _ => differences(&points),
        })
    }

    async fn bucketed(
        &self,
        variable_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
        timezone: Tz,
    ) -> CoreResult<Vec<DataPoint>> {
        let source = match self.rollups.view_for(interval, timezone, start) {
            Some(view) => SeriesSource::Rollup(view.to_string()),
            None => SeriesSource::Raw,
        };
        tracing::debug!(
            variable_id,
            %interval,
            %aggregation,
            timezone = timezone.name(),
            rollup = matches!(source, SeriesSource::Rollup(_)),
            "reading bucketed series"
        );

        let rows = self
            .store
            .bucketed_series(&SeriesQuery {
                variable_id,
                start,
                end,
                interval,
                aggregation,
                timezone,
                source,
            })
            .await?;
        let buckets = generate_buckets(start, end, interval, timezone)?;
        Ok(merge_onto_buckets(&buckets, &rows))
    }
}
