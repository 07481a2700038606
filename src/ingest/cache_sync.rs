use crate::error::CoreResult;
use crate::service::MeasurementService;
use crate::telemetry::Measurement;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

impl MeasurementService {
    /// Brings the last-value cache up to date with a persisted batch.
    ///
    /// Measurements without a timestamp count as observed at `now`, the time their rows were
    /// stored under. The newest sample per variable is compared against the cached time (or the
    /// newest stored row when the cache holds no time) and written only if it is not older.
    pub(in crate::ingest) async fn sync_cache(
        &self,
        project: &str,
        measurements: &[Measurement],
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut newest: BTreeMap<&str, (DateTime<Utc>, f64)> = BTreeMap::new();
        for measurement in measurements.iter().filter(|m| !m.is_heartbeat()) {
            let observed = measurement.timestamp().unwrap_or(now);
            match newest.get(measurement.name.as_str()) {
                Some((current, _)) if *current > observed => {}
                _ => {
                    newest.insert(&measurement.name, (observed, measurement.value));
                }
            }
        }

        for (name, (observed, mut value)) in newest {
            let mut timestamp_ms = observed.timestamp_millis();

            if self.cache.last_timestamp(project, name).await?.is_none() {
                if let Some(id) = self.registry.lookup(project, name).await? {
                    if let Some(stored) = self.store.last_measurement(id).await? {
                        let stored_ms = stored.time.timestamp_millis();
                        if stored_ms > timestamp_ms {
                            value = stored.value;
                            timestamp_ms = stored_ms;
                        }
                    }
                }
            }

            let written = self
                .cache
                .store_if_newer(project, name, value, timestamp_ms)
                .await?;
            if !written {
                tracing::trace!(project, variable = name, "cached value is newer");
            }
        }
        Ok(())
    }
}
