mod cache_sync;
mod dedup;


use crate::error::CoreResult;
use crate::service::MeasurementService;
use crate::store::MeasurementRow;
use crate::telemetry::{validate_variable_name, Measurement, MeasurementBatch, MetricResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Trusted callers that deduplicated upstream skip the stored-row check.
    pub skip_dedup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestOutcome {
    /// Distinct projects with at least one accepted measurement, sorted.
    pub updated_projects: Vec<String>,
    pub metrics: MetricResult,
}

fn accept_measurement(project: &str, measurement: &Measurement) -> bool {
    if let Err(err) = validate_variable_name(&measurement.name) {
        tracing::debug!(project, variable = %measurement.name, error = %err, "dropping measurement");
        return false;
    }
    if measurement.has_timestamp() && measurement.timestamp().is_none() {
        tracing::debug!(
            project,
            variable = %measurement.name,
            time = measurement.time,
            "dropping measurement with out of range time"
        );
        return false;
    }
    true
}

impl MeasurementService {
    /// Validates, deduplicates and persists `batches`, then refreshes the last-value cache.
    ///
    /// Unknown projects and invalid variable names are dropped without failing the call. Any
    /// store or cache failure aborts the call; projects persisted before the failure stay
    /// persisted.
    pub async fn ingest_measurements(
        &self,
        batches: Vec<MeasurementBatch>,
        options: IngestOptions,
    ) -> CoreResult<IngestOutcome> {
        let mut known_projects: HashMap<String, bool> = HashMap::new();
        let mut by_project: BTreeMap<String, Vec<Measurement>> = BTreeMap::new();

        for batch in batches {
            let exists = match known_projects.get(&batch.project_id) {
                Some(exists) => *exists,
                None => {
                    let exists = self.projects.exists(&batch.project_id).await?;
                    known_projects.insert(batch.project_id.clone(), exists);
                    exists
                }
            };
            if !exists {
                tracing::debug!(
                    project = %batch.project_id,
                    dropped = batch.measurements.len(),
                    "dropping measurements for unknown project"
                );
                continue;
            }

            let project = batch.project_id;
            let accepted: Vec<Measurement> = batch
                .measurements
                .into_iter()
                .filter(|measurement| accept_measurement(&project, measurement))
                .collect();
            by_project.entry(project).or_default().extend(accepted);
        }
        by_project.retain(|_, measurements| !measurements.is_empty());

        let updated_projects: Vec<String> = by_project.keys().cloned().collect();
        let mut metrics = MetricResult::default();

        for (project, measurements) in by_project {
            let measurements = if options.skip_dedup {
                measurements
            } else {
                self.drop_stored_duplicates(&project, measurements).await?
            };
            if measurements.is_empty() {
                continue;
            }

            let now = Utc::now();
            if measurements.iter().any(|m| !m.is_heartbeat()) {
                self.cache
                    .touch_last_write(&project, now.timestamp_millis())
                    .await?;
            }
            let created = self.persist(&project, &measurements, now).await?;
            tracing::debug!(
                project = %project,
                variables_created = created.variables_created,
                measurements_created = created.measurements_created,
                "persisted measurements"
            );
            metrics += created;

            self.sync_cache(&project, &measurements, now).await?;
        }

        Ok(IngestOutcome {
            updated_projects,
            metrics,
        })
    }

    /// Writes the rows of one project. Measurements without a timestamp are stored at `now`.
    async fn persist(
        &self,
        project: &str,
        measurements: &[Measurement],
        now: DateTime<Utc>,
    ) -> CoreResult<MetricResult> {
        let mut metrics = MetricResult::default();
        let mut heartbeat = false;
        let mut rows = Vec::with_capacity(measurements.len());

        for measurement in measurements {
            if measurement.is_heartbeat() {
                heartbeat = true;
                continue;
            }
            let resolved = self.registry.resolve(project, &measurement.name).await?;
            if resolved.created {
                metrics.variables_created += 1;
            }
            rows.push(MeasurementRow {
                variable_id: resolved.id,
                time: measurement.timestamp().unwrap_or(now),
                value: measurement.value,
                unit: measurement.unit.clone(),
            });
        }

        if heartbeat {
            self.cache
                .touch_heartbeat(project, now.timestamp_millis())
                .await?;
        }
        if !rows.is_empty() {
            let written = self.store.insert_measurements(&rows).await?;
            metrics.measurements_created = i64::try_from(written).unwrap_or(i64::MAX);
        }
        Ok(metrics)
    }
}
