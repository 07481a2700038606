use anyhow::{Context, Result};
use deadpool_redis::{PoolConfig, Runtime};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub async fn build_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub fn build_redis_pool(redis_url: &str, max_size: usize) -> Result<deadpool_redis::Pool> {
    let mut config = deadpool_redis::Config::from_url(redis_url);
    config.pool = Some(PoolConfig::new(max_size));
    config
        .create_pool(Some(Runtime::Tokio1))
        .context("failed to create redis pool")
}
