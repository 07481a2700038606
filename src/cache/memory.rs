use super::{LastValueCache, Liveness};
use crate::error::CoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct ProjectEntry {
    variables: HashMap<String, i32>,
    values: HashMap<String, f64>,
    timestamps: HashMap<String, i64>,
    liveness: Liveness,
}

/// In-process cache with the same semantics as the Redis layout.
#[derive(Debug, Default)]
pub struct MemoryLastValueCache {
    projects: Mutex<HashMap<String, ProjectEntry>>,
}

impl MemoryLastValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached id and value of `project`, as after a cache flush.
    pub async fn evict(&self, project: &str) {
        self.projects.lock().await.remove(project);
    }
}

#[async_trait]
impl LastValueCache for MemoryLastValueCache {
    async fn variable_id(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project)
            .and_then(|entry| entry.variables.get(name).copied()))
    }

    async fn set_variable_id(&self, project: &str, name: &str, id: i32) -> CoreResult<()> {
        let mut projects = self.projects.lock().await;
        projects
            .entry(project.to_string())
            .or_default()
            .variables
            .insert(name.to_string(), id);
        Ok(())
    }

    async fn last_values(&self, project: &str) -> CoreResult<HashMap<String, f64>> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project)
            .map(|entry| entry.values.clone())
            .unwrap_or_default())
    }

    async fn last_value(&self, project: &str, name: &str) -> CoreResult<Option<f64>> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project)
            .and_then(|entry| entry.values.get(name).copied()))
    }

    async fn last_timestamp(&self, project: &str, name: &str) -> CoreResult<Option<i64>> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project)
            .and_then(|entry| entry.timestamps.get(name).copied()))
    }

    async fn store_if_newer(
        &self,
        project: &str,
        name: &str,
        value: f64,
        timestamp_ms: i64,
    ) -> CoreResult<bool> {
        let mut projects = self.projects.lock().await;
        let entry = projects.entry(project.to_string()).or_default();
        if entry
            .timestamps
            .get(name)
            .is_some_and(|current| *current > timestamp_ms)
        {
            return Ok(false);
        }
        entry.values.insert(name.to_string(), value);
        entry.timestamps.insert(name.to_string(), timestamp_ms);
        Ok(true)
    }

    async fn touch_last_write(&self, project: &str, at_ms: i64) -> CoreResult<()> {
        let mut projects = self.projects.lock().await;
        projects
            .entry(project.to_string())
            .or_default()
            .liveness
            .last_write_ms = Some(at_ms);
        Ok(())
    }

    async fn touch_heartbeat(&self, project: &str, at_ms: i64) -> CoreResult<()> {
        let mut projects = self.projects.lock().await;
        projects
            .entry(project.to_string())
            .or_default()
            .liveness
            .last_heartbeat_ms = Some(at_ms);
        Ok(())
    }

    async fn liveness(&self, project: &str) -> CoreResult<Liveness> {
        let projects = self.projects.lock().await;
        Ok(projects
            .get(project)
            .map(|entry| entry.liveness)
            .unwrap_or_default())
    }
}
