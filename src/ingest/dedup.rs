use crate::error::CoreResult;
use crate::service::MeasurementService;
use crate::telemetry::Measurement;
use std::collections::{HashMap, HashSet};

impl MeasurementService {
    /// Drops timestamped measurements whose `(variable, time)` row already exists. Heartbeats,
    /// measurements without a timestamp and names never registered pass through.
    pub(in crate::ingest) async fn drop_stored_duplicates(
        &self,
        project: &str,
        measurements: Vec<Measurement>,
    ) -> CoreResult<Vec<Measurement>> {
        let stamped: Vec<&Measurement> = measurements
            .iter()
            .filter(|m| !m.is_heartbeat() && m.has_timestamp())
            .collect();
        let span = stamped
            .iter()
            .filter_map(|m| m.timestamp())
            .fold(None, |span, ts| match span {
                None => Some((ts, ts)),
                Some((start, end)) => Some((ts.min(start), ts.max(end))),
            });
        let Some((start, end)) = span else {
            return Ok(measurements);
        };

        let mut ids: HashMap<String, i32> = HashMap::new();
        for measurement in &stamped {
            if ids.contains_key(&measurement.name) {
                continue;
            }
            if let Some(id) = self.registry.lookup(project, &measurement.name).await? {
                ids.insert(measurement.name.clone(), id);
            }
        }
        if ids.is_empty() {
            return Ok(measurements);
        }

        let variable_ids: Vec<i32> = ids.values().copied().collect();
        let stored: HashSet<(i32, i64)> = self
            .store
            .existing_times(&variable_ids, start, end)
            .await?
            .into_iter()
            .map(|(id, time)| (id, time.timestamp_micros()))
            .collect();
        if stored.is_empty() {
            return Ok(measurements);
        }

        let before = measurements.len();
        let kept: Vec<Measurement> = measurements
            .into_iter()
            .filter(|m| {
                if m.is_heartbeat() || !m.has_timestamp() {
                    return true;
                }
                ids.get(&m.name)
                    .map_or(true, |id| !stored.contains(&(*id, m.time_key())))
            })
            .collect();
        tracing::debug!(
            project,
            dropped = before - kept.len(),
            "dropped already stored measurements"
        );
        Ok(kept)
    }
}
