use crate::error::CoreResult;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

mod memory;
mod redis;

pub use self::memory::MemoryLastValueCache;
pub use self::redis::RedisLastValueCache;

/// Liveness markers of a project, unix milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Liveness {
    /// Last accepted non-heartbeat write.
    pub last_write_ms: Option<i64>,
    pub last_heartbeat_ms: Option<i64>,
}

/// Key layout shared by every project.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Hash holding the `last` and `heartbeat` markers.
    pub fn project(&self, project: &str) -> String {
        format!("{}:projects:{}", self.prefix, project)
    }

    /// Hash of variable name to store id.
    pub fn variables(&self, project: &str) -> String {
        format!("{}:variables", self.project(project))
    }

    /// Hash of variable name to last value.
    pub fn values(&self, project: &str) -> String {
        format!("{}:measurements", self.project(project))
    }

    /// Hash of variable name to the time of the cached value.
    pub fn timestamps(&self, project: &str) -> String {
        format!("{}:measurements:timestamps", self.project(project))
    }
}

/// Low-latency view of the newest value per variable. Every entry may be stale or missing; the
/// store remains authoritative.
#[async_trait]
pub trait LastValueCache: Send + Sync {
    async fn variable_id(&self, project: &str, name: &str) -> CoreResult<Option<i32>>;

    async fn set_variable_id(&self, project: &str, name: &str, id: i32) -> CoreResult<()>;

    async fn last_values(&self, project: &str) -> CoreResult<HashMap<String, f64>>;

    async fn last_value(&self, project: &str, name: &str) -> CoreResult<Option<f64>>;

    /// Time of the cached value in unix milliseconds.
    async fn last_timestamp(&self, project: &str, name: &str) -> CoreResult<Option<i64>>;

    /// Atomically replaces value and timestamp unless the cached timestamp is newer. Equal
    /// timestamps favour the incoming value. Returns whether the entry was written.
    async fn store_if_newer(
        &self,
        project: &str,
        name: &str,
        value: f64,
        timestamp_ms: i64,
    ) -> CoreResult<bool>;

    async fn touch_last_write(&self, project: &str, at_ms: i64) -> CoreResult<()>;

    async fn touch_heartbeat(&self, project: &str, at_ms: i64) -> CoreResult<()>;

    async fn liveness(&self, project: &str) -> CoreResult<Liveness>;
}
