use super::{CacheKeys, LastValueCache, Liveness};
use crate::error::CoreResult;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::Script;
use std::collections::HashMap;

const FIELD_LAST_WRITE: &str = "last";
const FIELD_HEARTBEAT: &str = "heartbeat";

pub struct RedisLastValueCache {
    pool: Pool,
    keys: CacheKeys,
    store_if_newer: Script,
}

impl RedisLastValueCache {
    pub fn new(pool: Pool, keys: CacheKeys) -> Self {
        Self {
            pool,
            keys,
            store_if_newer: Script::new(include_str!("store_if_newer.lua")),
        }
    }

    async fn connection(&self) -> CoreResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn hset<V>(&self, key: String, field: &str, value: V) -> CoreResult<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        let mut conn = self.connection().await?;
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hget<T>(&self, key: String, field: &str) -> CoreResult<Option<T>>
    where
        T: redis::FromRedisValue,
    {
        let mut conn = self.connection().await?;
        let value = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async::<Option<T>>(&mut conn)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl LastValueCache for RedisLastValueCache {
    async fn variable_id(&self, project: &str, name: &str) -> CoreResult<Option<i32>> {
        self.hget(self.keys.variables(project), name).await
    }

    async fn set_variable_id(&self, project: &str, name: &str, id: i32) -> CoreResult<()> {
        self.hset(self.keys.variables(project), name, id).await
    }

    async fn last_values(&self, project: &str) -> CoreResult<HashMap<String, f64>> {
        let mut conn = self.connection().await?;
        let values = redis::cmd("HGETALL")
            .arg(self.keys.values(project))
            .query_async::<HashMap<String, f64>>(&mut conn)
            .await?;
        Ok(values)
    }

    async fn last_value(&self, project: &str, name: &str) -> CoreResult<Option<f64>> {
        self.hget(self.keys.values(project), name).await
    }

    async fn last_timestamp(&self, project: &str, name: &str) -> CoreResult<Option<i64>> {
        self.hget(self.keys.timestamps(project), name).await
    }

    async fn store_if_newer(
        &self,
        project: &str,
        name: &str,
        value: f64,
        timestamp_ms: i64,
    ) -> CoreResult<bool> {
        let mut conn = self.connection().await?;
        let written: i64 = self
            .store_if_newer
            .key(self.keys.values(project))
            .key(self.keys.timestamps(project))
            .arg(name)
            .arg(value)
            .arg(timestamp_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn touch_last_write(&self, project: &str, at_ms: i64) -> CoreResult<()> {
        self.hset(self.keys.project(project), FIELD_LAST_WRITE, at_ms)
            .await
    }

    async fn touch_heartbeat(&self, project: &str, at_ms: i64) -> CoreResult<()> {
        self.hset(self.keys.project(project), FIELD_HEARTBEAT, at_ms)
            .await
    }

    async fn liveness(&self, project: &str) -> CoreResult<Liveness> {
        let mut conn = self.connection().await?;
        let (last_write_ms, last_heartbeat_ms) = redis::cmd("HMGET")
            .arg(self.keys.project(project))
            .arg(FIELD_LAST_WRITE)
            .arg(FIELD_HEARTBEAT)
            .query_async::<(Option<i64>, Option<i64>)>(&mut conn)
            .await?;
        Ok(Liveness {
            last_write_ms,
            last_heartbeat_ms,
        })
    }
}
