use super::{
    MeasurementRow, MeasurementStore, Observation, SeriesQuery, SeriesSource, VariableInsert,
};
use crate::config::DEFAULT_ROLLUP_TIMEZONE;
use crate::error::{CoreError, CoreResult};
use crate::history::aggregation::Aggregation;
use crate::history::buckets::bucket_floor;
use crate::history::interval::Interval;
use crate::history::rollup::RollupCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct StoreState {
    next_id: i32,
    variables: HashMap<(String, String), i32>,
    rows: BTreeMap<(i32, DateTime<Utc>), (f64, String)>,
}

impl StoreState {
    fn samples(&self, variable_id: i32) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.rows
            .range((variable_id, DateTime::<Utc>::MIN_UTC)..=(variable_id, DateTime::<Utc>::MAX_UTC))
            .map(|((_, time), (value, _))| (*time, *value))
    }

    /// Samples grouped by bucket start, both levels ordered by time.
    fn bucketed(
        &self,
        variable_id: i32,
        interval: Interval,
        tz: Tz,
        keep_sample: impl Fn(DateTime<Utc>) -> bool,
    ) -> CoreResult<BTreeMap<DateTime<Utc>, Vec<(DateTime<Utc>, f64)>>> {
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
        for (time, value) in self.samples(variable_id).filter(|(time, _)| keep_sample(*time)) {
            let bucket = bucket_floor(time, interval, tz)?;
            buckets.entry(bucket).or_default().push((time, value));
        }
        Ok(buckets)
    }
}

/// Store held in process memory. Rollup views are emulated by bucketing raw rows in the
/// catalogue's timezone.
#[derive(Debug)]
pub struct MemoryMeasurementStore {
    state: Mutex<StoreState>,
    rollups: RollupCatalog,
}

impl Default for MemoryMeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMeasurementStore {
    pub fn new() -> Self {
        Self::with_rollups(RollupCatalog::standard(DEFAULT_ROLLUP_TIMEZONE))
    }

    pub fn with_rollups(rollups: RollupCatalog) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            rollups,
        }
    }

    pub async fn rows(&self, variable_id: i32) -> Vec<MeasurementRow> {
        let state = self.state.lock().await;
        state
            .rows
            .iter()
            .filter(|((id, _), _)| *id == variable_id)
            .map(|((id, time), (value, unit))| MeasurementRow {
                variable_id: *id,
                time: *time,
                value: *value,
                unit: unit.clone(),
            })
            .collect()
    }

    pub async fn row_count(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    fn rollup_interval(&self, view: &str) -> CoreResult<Interval> {
        self.rollups
            .interval_of(view)
            .ok_or_else(|| CoreError::not_found(format!("rollup view {view}")))
    }
}

#[async_trait]
impl MeasurementStore for MemoryMeasurementStore {
    async fn find_variable(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        let state = self.state.lock().await;
        Ok(state
            .variables
            .get(&(project.to_string(), name.to_string()))
            .copied())
    }

    async fn insert_variable(&self, project: &str, name: &str) -> CoreResult<VariableInsert> {
        let mut state = self.state.lock().await;
        let key = (project.to_string(), name.to_string());
        if let Some(id) = state.variables.get(&key) {
            return Ok(VariableInsert::Existing(*id));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.variables.insert(key, id);
        Ok(VariableInsert::Created(id))
    }

    async fn count_variables(&self, project: &str) -> CoreResult<usize> {
        let state = self.state.lock().await;
        Ok(state
            .variables
            .keys()
            .filter(|(owner, _)| owner == project)
            .count())
    }

    async fn existing_times(
        &self,
        variable_ids: &[i32],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<(i32, DateTime<Utc>)>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .keys()
            .filter(|(id, time)| variable_ids.contains(id) && *time >= start && *time <= end)
            .copied()
            .collect())
    }

    async fn insert_measurements(&self, rows: &[MeasurementRow]) -> CoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut written = 0;
        for row in rows {
            let key = (row.variable_id, row.time);
            if state.rows.contains_key(&key) {
                continue;
            }
            state.rows.insert(key, (row.value, row.unit.clone()));
            written += 1;
        }
        Ok(written)
    }

    async fn last_measurement(&self, variable_id: i32) -> CoreResult<Option<Observation>> {
        let state = self.state.lock().await;
        Ok(state
            .samples(variable_id)
            .last()
            .map(|(time, value)| Observation { time, value }))
    }

    async fn last_measurement_before(
        &self,
        variable_id: i32,
        before: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        let state = self.state.lock().await;
        Ok(state
            .samples(variable_id)
            .filter(|(time, _)| *time < before && *time > since)
            .last()
            .map(|(time, value)| Observation { time, value }))
    }

    async fn last_rollup_before(
        &self,
        variable_id: i32,
        view: &str,
        aggregation: Aggregation,
        before: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        let interval = self.rollup_interval(view)?;
        let state = self.state.lock().await;
        let buckets = state.bucketed(variable_id, interval, self.rollups.timezone(), |_| true)?;
        Ok(buckets
            .range(..=before)
            .next_back()
            .and_then(|(bucket, samples)| {
                aggregation.reduce(samples).map(|value| Observation {
                    time: *bucket,
                    value,
                })
            }))
    }

    async fn bucketed_series(
        &self,
        query: &SeriesQuery,
    ) -> CoreResult<Vec<(DateTime<Utc>, Option<f64>)>> {
        let state = self.state.lock().await;
        let buckets = match &query.source {
            SeriesSource::Raw => state.bucketed(
                query.variable_id,
                query.interval,
                query.timezone,
                |time| time >= query.start && time <= query.end,
            )?,
            SeriesSource::Rollup(view) => {
                let interval = self.rollup_interval(view)?;
                let mut all =
                    state.bucketed(query.variable_id, interval, self.rollups.timezone(), |_| true)?;
                all.retain(|bucket, _| *bucket >= query.start && *bucket <= query.end);
                all
            }
        };
        Ok(buckets
            .into_iter()
            .map(|(bucket, samples)| (bucket, query.aggregation.reduce(&samples)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn row(variable_id: i32, time: DateTime<Utc>, value: f64) -> MeasurementRow {
        MeasurementRow {
            variable_id,
            time,
            value,
            unit: String::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_rows_are_ignored() {
        let store = MemoryMeasurementStore::new();
        let id = store.insert_variable("p", "temp").await.unwrap().id();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(store.insert_measurements(&[row(id, t, 1.0)]).await.unwrap(), 1);
        assert_eq!(store.insert_measurements(&[row(id, t, 2.0)]).await.unwrap(), 0);
        assert_eq!(store.rows(id).await[0].value, 1.0);
        assert_eq!(
            store.insert_variable("p", "temp").await.unwrap(),
            VariableInsert::Existing(id)
        );
    }

    #[tokio::test]
    async fn raw_series_reduces_each_bucket() {
        let store = MemoryMeasurementStore::new();
        let id = store.insert_variable("p", "temp").await.unwrap().id();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let rows: Vec<_> = [0, 5, 20, 50]
            .into_iter()
            .map(|minute| row(id, base + Duration::minutes(minute), minute as f64))
            .collect();
        store.insert_measurements(&rows).await.unwrap();

        let series = store
            .bucketed_series(&SeriesQuery {
                variable_id: id,
                start: base,
                end: base + Duration::hours(1),
                interval: Interval::FifteenMinutes,
                aggregation: Aggregation::Max,
                timezone: chrono_tz::UTC,
                source: SeriesSource::Raw,
            })
            .await
            .unwrap();
        assert_eq!(
            series,
            vec![
                (base, Some(5.0)),
                (base + Duration::minutes(15), Some(20.0)),
                (base + Duration::minutes(45), Some(50.0)),
            ]
        );
    }
}
