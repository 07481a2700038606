use super::aggregation::{Aggregation, MissingValueStrategy};
use super::interval::Interval;
use super::rollup::RollupCatalog;
use super::HistoryOptions;
use crate::cache::MemoryLastValueCache;
use crate::error::{CoreError, CoreResult};
use crate::ingest::IngestOptions;
use crate::projects::StaticProjectDirectory;
use crate::service::MeasurementService;
use crate::store::{
    MeasurementRow, MeasurementStore, MemoryMeasurementStore, Observation, SeriesQuery,
    SeriesSource, VariableInsert,
};
use crate::telemetry::{datetime_to_seconds, Measurement, MeasurementBatch};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};

/// Memory store that remembers which source every series read used.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryMeasurementStore,
    sources: Mutex<Vec<SeriesSource>>,
}

impl RecordingStore {
    fn sources(&self) -> Vec<SeriesSource> {
        self.sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementStore for RecordingStore {
    async fn find_variable(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        self.inner.find_variable(project, name).await
    }

    async fn insert_variable(&self, project: &str, name: &str) -> CoreResult<VariableInsert> {
        self.inner.insert_variable(project, name).await
    }

    async fn count_variables(&self, project: &str) -> CoreResult<usize> {
        self.inner.count_variables(project).await
    }

    async fn existing_times(
        &self,
        variable_ids: &[i32],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<(i32, DateTime<Utc>)>> {
        self.inner.existing_times(variable_ids, start, end).await
    }

    async fn insert_measurements(&self, rows: &[MeasurementRow]) -> CoreResult<u64> {
        self.inner.insert_measurements(rows).await
    }

    async fn last_measurement(&self, variable_id: i32) -> CoreResult<Option<Observation>> {
        self.inner.last_measurement(variable_id).await
    }

    async fn last_measurement_before(
        &self,
        variable_id: i32,
        before: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        self.inner
            .last_measurement_before(variable_id, before, since)
            .await
    }

    async fn last_rollup_before(
        &self,
        variable_id: i32,
        view: &str,
        aggregation: Aggregation,
        before: DateTime<Utc>,
    ) -> CoreResult<Option<Observation>> {
        self.inner
            .last_rollup_before(variable_id, view, aggregation, before)
            .await
    }

    async fn bucketed_series(
        &self,
        query: &SeriesQuery,
    ) -> CoreResult<Vec<(DateTime<Utc>, Option<f64>)>> {
        self.sources.lock().unwrap().push(query.source.clone());
        self.inner.bucketed_series(query).await
    }
}

fn service_with(store: Arc<RecordingStore>, rollups: RollupCatalog) -> MeasurementService {
    MeasurementService::new(
        store,
        Arc::new(MemoryLastValueCache::new()),
        Arc::new(StaticProjectDirectory::new(100).with_project("p1")),
        rollups,
    )
}

fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
}

async fn seed(service: &MeasurementService, variable: &str, samples: &[(DateTime<Utc>, f64)]) {
    let measurements = samples
        .iter()
        .map(|(time, value)| Measurement::new(variable, *value, datetime_to_seconds(*time)))
        .collect();
    service
        .ingest_measurements(
            vec![MeasurementBatch::new("p1", measurements)],
            IngestOptions::default(),
        )
        .await
        .expect("seed ingest");
}

fn options(
    variable: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
    aggregation: Aggregation,
    timezone: Tz,
) -> HistoryOptions {
    HistoryOptions {
        project_id: "p1".to_string(),
        variable: variable.to_string(),
        start,
        end,
        interval,
        aggregation,
        missing_value_strategy: MissingValueStrategy::None,
        timezone,
    }
}

fn values(points: &[super::series::DataPoint]) -> Vec<Option<f64>> {
    points.iter().map(|point| point.value).collect()
}

#[tokio::test]
async fn every_bucket_is_reported_even_without_data() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store.clone(), RollupCatalog::none(chrono_tz::UTC));
    seed(&service, "temp", &[(utc(10, 10), 5.0), (utc(10, 40), 7.0)]).await;

    let mut request = options(
        "temp",
        utc(9, 0),
        utc(12, 0),
        Interval::OneHour,
        Aggregation::Avg,
        chrono_tz::UTC,
    );
    let points = service.history(&request).await.unwrap();
    assert_eq!(
        points.iter().map(|p| p.time).collect::<Vec<_>>(),
        vec![utc(9, 0), utc(10, 0), utc(11, 0), utc(12, 0)]
    );
    assert_eq!(values(&points), vec![None, Some(6.0), None, None]);

    request.missing_value_strategy = MissingValueStrategy::Locf;
    let filled = service.history(&request).await.unwrap();
    assert_eq!(values(&filled), vec![None, Some(6.0), Some(6.0), Some(6.0)]);

    let wire = service.history_wire(&request).await.unwrap();
    assert_eq!(wire[0], (utc(9, 0).timestamp(), 0.0));
    assert_eq!(wire[3], (utc(12, 0).timestamp(), 6.0));
}

#[tokio::test]
async fn counter_dips_are_clamped_before_differencing() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store, RollupCatalog::standard(chrono_tz::Europe::Vienna));
    seed(
        &service,
        "energy",
        &[(utc(10, 0), 10.0), (utc(10, 1), 8.0), (utc(10, 2), 12.0)],
    )
    .await;

    let points = service
        .history(&options(
            "energy",
            utc(10, 0),
            utc(10, 2),
            Interval::OneMinute,
            Aggregation::Diff,
            chrono_tz::UTC,
        ))
        .await
        .unwrap();
    assert_eq!(values(&points), vec![Some(2.0), Some(0.0)]);
    assert_eq!(points[0].time, utc(10, 1));
}

#[tokio::test]
async fn derivate_reports_change_per_hour() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store, RollupCatalog::none(chrono_tz::Europe::Vienna));
    seed(&service, "energy", &[(utc(9, 0), 100.0), (utc(10, 0), 104.0)]).await;

    let points = service
        .history(&options(
            "energy",
            utc(9, 0),
            utc(10, 0),
            Interval::OneHour,
            Aggregation::Derivate,
            chrono_tz::UTC,
        ))
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, Some(4.0));
    assert_eq!(points[0].time, utc(10, 0));
}

#[tokio::test]
async fn counters_with_a_rollup_include_the_preceding_bucket() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store.clone(), RollupCatalog::standard(chrono_tz::Europe::Vienna));
    seed(
        &service,
        "energy",
        &[(utc(8, 30), 100.0), (utc(9, 30), 103.0), (utc(10, 30), 107.0)],
    )
    .await;

    let points = service
        .history(&options(
            "energy",
            utc(9, 0),
            utc(10, 0),
            Interval::OneHour,
            Aggregation::Diff,
            chrono_tz::Europe::Vienna,
        ))
        .await
        .unwrap();
    assert_eq!(
        points.iter().map(|p| p.time).collect::<Vec<_>>(),
        vec![utc(9, 0), utc(10, 0)]
    );
    assert_eq!(values(&points), vec![Some(3.0), Some(4.0)]);
    assert_eq!(
        store.sources(),
        vec![SeriesSource::Rollup(
            "measurements_1_hour_europe_vienna".to_string()
        )]
    );
}

#[tokio::test]
async fn rollups_are_used_only_for_equivalent_timezones() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store.clone(), RollupCatalog::standard(chrono_tz::Europe::Vienna));
    seed(&service, "temp", &[(utc(10, 5), 1.0)]).await;

    for timezone in [chrono_tz::Europe::Berlin, chrono_tz::America::New_York] {
        service
            .history(&options(
                "temp",
                utc(9, 0),
                utc(12, 0),
                Interval::OneHour,
                Aggregation::Max,
                timezone,
            ))
            .await
            .unwrap();
    }
    service
        .history(&options(
            "temp",
            utc(10, 0),
            utc(10, 30),
            Interval::OneMinute,
            Aggregation::Max,
            chrono_tz::Europe::Vienna,
        ))
        .await
        .unwrap();

    assert_eq!(
        store.sources(),
        vec![
            SeriesSource::Rollup("measurements_1_hour_europe_vienna".to_string()),
            SeriesSource::Raw,
            SeriesSource::Raw,
        ]
    );
}

#[tokio::test]
async fn daily_buckets_follow_the_requested_timezone() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store, RollupCatalog::standard(chrono_tz::Europe::Vienna));
    // 2024-06-03 in Vienna runs from 06-02 22:00Z to 06-03 22:00Z
    seed(
        &service,
        "temp",
        &[(utc(1, 0), 10.0), (utc(21, 0), 20.0), (utc(23, 0), 99.0)],
    )
    .await;

    let start = Utc.with_ymd_and_hms(2024, 6, 2, 22, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 6, 3, 22, 0, 0).unwrap();
    let points = service
        .history(&options(
            "temp",
            start,
            end,
            Interval::OneDay,
            Aggregation::Avg,
            chrono_tz::Europe::Vienna,
        ))
        .await
        .unwrap();
    assert_eq!(values(&points), vec![Some(15.0), Some(99.0)]);
}

#[tokio::test]
async fn invalid_requests_fail_before_reading() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store.clone(), RollupCatalog::none(chrono_tz::UTC));
    seed(&service, "temp", &[(utc(10, 0), 1.0)]).await;

    let reversed = options(
        "temp",
        utc(10, 0),
        utc(10, 0),
        Interval::OneMinute,
        Aggregation::Avg,
        chrono_tz::UTC,
    );
    assert!(matches!(
        service.history(&reversed).await,
        Err(CoreError::Validation(_))
    ));

    let too_long = options(
        "temp",
        utc(0, 0),
        utc(4, 0),
        Interval::OneSecond,
        Aggregation::Avg,
        chrono_tz::UTC,
    );
    assert!(matches!(
        service.history(&too_long).await,
        Err(CoreError::Validation(_))
    ));
    assert!(store.sources().is_empty());
}

#[tokio::test]
async fn unknown_variables_are_not_found() {
    let store = Arc::new(RecordingStore::default());
    let service = service_with(store, RollupCatalog::none(chrono_tz::UTC));
    let err = service
        .history(&options(
            "missing",
            utc(9, 0),
            utc(10, 0),
            Interval::OneHour,
            Aggregation::Avg,
            chrono_tz::UTC,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[test]
fn decodes_json_requests() {
    let mut payload = br#"{
        "projectId": "p1",
        "variable": "temp",
        "start": "2024-06-03T00:00:00Z",
        "end": "2024-06-04T00:00:00Z",
        "interval": "15m",
        "aggregation": "avgtw",
        "missingValueStrategy": "locf",
        "timezone": "Europe/Vienna"
    }"#
    .to_vec();
    let options = HistoryOptions::from_json(&mut payload).unwrap();
    assert_eq!(options.interval, Interval::FifteenMinutes);
    assert_eq!(options.aggregation, Aggregation::AvgTw);
    assert_eq!(options.missing_value_strategy, MissingValueStrategy::Locf);
    assert_eq!(options.timezone, chrono_tz::Europe::Vienna);
    assert!(options.validate().is_ok());

    let mut unknown = br#"{"projectId": "p1", "variable": "temp",
        "start": "2024-06-03T00:00:00Z", "end": "2024-06-04T00:00:00Z",
        "interval": "2h", "aggregation": "avg", "timezone": "UTC"}"#
        .to_vec();
    assert!(matches!(
        HistoryOptions::from_json(&mut unknown),
        Err(CoreError::Validation(_))
    ));
}
