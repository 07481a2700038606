use crate::cache::{CacheKeys, LastValueCache, Liveness, RedisLastValueCache};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::history::aggregation::Aggregation;
use crate::history::interval::Interval;
use crate::history::rollup::RollupCatalog;
use crate::history::series::DataPoint;
use crate::projects::{PgProjectDirectory, ProjectDirectory};
use crate::registry::VariableRegistry;
use crate::store::{MeasurementStore, PgMeasurementStore};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

/// Entry point for ingestion and reads. Cheap to clone; every clone shares the same store, cache
/// and project directory.
#[derive(Clone)]
pub struct MeasurementService {
    pub(crate) store: Arc<dyn MeasurementStore>,
    pub(crate) cache: Arc<dyn LastValueCache>,
    pub(crate) projects: Arc<dyn ProjectDirectory>,
    pub(crate) registry: VariableRegistry,
    pub(crate) rollups: RollupCatalog,
    pub(crate) recent_window: Duration,
}

impl MeasurementService {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        cache: Arc<dyn LastValueCache>,
        projects: Arc<dyn ProjectDirectory>,
        rollups: RollupCatalog,
    ) -> Self {
        let registry = VariableRegistry::new(store.clone(), cache.clone(), projects.clone());
        Self {
            store,
            cache,
            projects,
            registry,
            rollups,
            recent_window: Duration::days(10),
        }
    }

    pub fn with_recent_window(mut self, recent_window: Duration) -> Self {
        self.recent_window = recent_window;
        self
    }

    /// Postgres store, Redis cache and the standard rollups.
    pub fn connect(config: &Config, pool: PgPool, redis: deadpool_redis::Pool) -> Self {
        let store = Arc::new(PgMeasurementStore::new(pool.clone()));
        let cache = Arc::new(RedisLastValueCache::new(
            redis,
            CacheKeys::new(config.cache_key_prefix.clone()),
        ));
        let projects = Arc::new(PgProjectDirectory::new(pool, config.variable_limit));
        Self::new(
            store,
            cache,
            projects,
            RollupCatalog::standard(config.rollup_timezone),
        )
        .with_recent_window(config.recent_window())
    }

    /// Cached last value of every variable of `project`.
    pub async fn current_values(&self, project: &str) -> CoreResult<HashMap<String, f64>> {
        self.cache.last_values(project).await
    }

    pub async fn liveness(&self, project: &str) -> CoreResult<Liveness> {
        self.cache.liveness(project).await
    }

    /// Newest value of `variable`, or the newest one strictly before `before`.
    ///
    /// Without `before` the cache answers. With it, recent times read raw rows inside the recent
    /// window and older times read the `last` column of the 15 minute rollup.
    pub async fn latest(
        &self,
        project: &str,
        variable: &str,
        before: Option<DateTime<Utc>>,
    ) -> CoreResult<Option<DataPoint>> {
        let id = self
            .registry
            .lookup(project, variable)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!("variable {variable} in project {project}"))
            })?;

        let Some(before) = before else {
            let Some(value) = self.cache.last_value(project, variable).await? else {
                return Ok(None);
            };
            let time = self
                .cache
                .last_timestamp(project, variable)
                .await?
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or_else(Utc::now);
            return Ok(Some(DataPoint::new(time, Some(value))));
        };

        let since = Utc::now() - self.recent_window;
        let observation = if before > since {
            self.store.last_measurement_before(id, before, since).await?
        } else {
            match self.rollups.view(Interval::FifteenMinutes) {
                Some(view) => {
                    self.store
                        .last_rollup_before(id, view, Aggregation::Last, before)
                        .await?
                }
                None => {
                    self.store
                        .last_measurement_before(id, before, DateTime::<Utc>::MIN_UTC)
                        .await?
                }
            }
        };
        Ok(observation.map(|observation| DataPoint::new(observation.time, Some(observation.value))))
    }
}
