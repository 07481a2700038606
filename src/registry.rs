use crate::cache::LastValueCache;
use crate::error::{CoreError, CoreResult};
use crate::projects::ProjectDirectory;
use crate::store::{MeasurementStore, VariableInsert};
use std::sync::Arc;

/// A resolved variable id and whether this call registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: i32,
    pub created: bool,
}

/// Maps `(project, name)` to the store's variable id, cache first.
///
/// The store row is always written before the cache entry, so a cached id always exists in the
/// store. A failure between the two only leaves the cache cold.
#[derive(Clone)]
pub struct VariableRegistry {
    store: Arc<dyn MeasurementStore>,
    cache: Arc<dyn LastValueCache>,
    projects: Arc<dyn ProjectDirectory>,
}

impl VariableRegistry {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        cache: Arc<dyn LastValueCache>,
        projects: Arc<dyn ProjectDirectory>,
    ) -> Self {
        Self {
            store,
            cache,
            projects,
        }
    }

    /// Existing id without registering anything.
    pub async fn lookup(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        if let Some(id) = self.cache.variable_id(project, name).await? {
            return Ok(Some(id));
        }
        let Some(id) = self.store.find_variable(project, name).await? else {
            return Ok(None);
        };
        self.cache.set_variable_id(project, name, id).await?;
        Ok(Some(id))
    }

    /// Id for `name`, registering it when the project is below its variable limit.
    pub async fn resolve(&self, project: &str, name: &str) -> CoreResult<Resolved> {
        if let Some(id) = self.lookup(project, name).await? {
            return Ok(Resolved { id, created: false });
        }

        let limit = self.projects.variable_limit(project).await?;
        let registered = self.store.count_variables(project).await?;
        if registered >= limit {
            tracing::warn!(project, variable = name, limit, "variable limit reached");
            return Err(CoreError::LimitExceeded {
                project: project.to_string(),
                limit,
            });
        }

        let inserted = self.store.insert_variable(project, name).await?;
        self.cache
            .set_variable_id(project, name, inserted.id())
            .await?;
        Ok(Resolved {
            id: inserted.id(),
            created: matches!(inserted, VariableInsert::Created(_)),
        })
    }
}
