use crate::error::CoreResult;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

/// Tenant lookups needed by ingestion.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn exists(&self, project: &str) -> CoreResult<bool>;

    /// Maximum number of distinct variables the project may register.
    async fn variable_limit(&self, project: &str) -> CoreResult<usize>;
}

pub struct PgProjectDirectory {
    pool: PgPool,
    variable_limit: usize,
}

impl PgProjectDirectory {
    pub fn new(pool: PgPool, variable_limit: usize) -> Self {
        Self {
            pool,
            variable_limit,
        }
    }
}

#[async_trait]
impl ProjectDirectory for PgProjectDirectory {
    async fn exists(&self, project: &str) -> CoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id::text = $1)")
                .bind(project)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn variable_limit(&self, _project: &str) -> CoreResult<usize> {
        Ok(self.variable_limit)
    }
}

/// Fixed set of known projects.
#[derive(Debug, Clone, Default)]
pub struct StaticProjectDirectory {
    limits: HashMap<String, usize>,
    default_limit: usize,
}

impl StaticProjectDirectory {
    pub fn new(default_limit: usize) -> Self {
        Self {
            limits: HashMap::new(),
            default_limit,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.limits.insert(project.into(), self.default_limit);
        self
    }

    pub fn with_project_limit(mut self, project: impl Into<String>, limit: usize) -> Self {
        self.limits.insert(project.into(), limit);
        self
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjectDirectory {
    async fn exists(&self, project: &str) -> CoreResult<bool> {
        Ok(self.limits.contains_key(project))
    }

    async fn variable_limit(&self, project: &str) -> CoreResult<usize> {
        Ok(self
            .limits
            .get(project)
            .copied()
            .unwrap_or(self.default_limit))
    }
}
