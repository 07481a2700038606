use anyhow::{Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VARIABLE_LIMIT: usize = 8192;
pub const DEFAULT_ROLLUP_TIMEZONE: Tz = chrono_tz::Europe::Vienna;
const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/measurements-core/config.json";

fn setup_config_path() -> PathBuf {
    if let Ok(path) = env::var("MEASUREMENTS_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    if let Ok(state_dir) = env::var("MEASUREMENTS_STATE_DIR") {
        let trimmed = state_dir.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join("config.json");
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    redis_url: Option<String>,
    #[serde(default)]
    cache_key_prefix: Option<String>,
    #[serde(default)]
    variable_limit: Option<usize>,
    #[serde(default)]
    rollup_timezone: Option<String>,
    #[serde(default)]
    recent_window_days: Option<i64>,
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = setup_config_path();
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "measurements-core failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    parse_setup_overrides(contents).or_else(|| {
        tracing::warn!(
            path = %path.display(),
            "measurements-core failed to parse setup config; using env defaults"
        );
        None
    })
}

fn parse_setup_overrides(contents: String) -> Option<SetupConfigOverrides> {
    let mut bytes = contents.into_bytes();
    simd_json::serde::from_slice(&mut bytes).ok()
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn apply_setup_overrides(config: &mut Config, overrides: &SetupConfigOverrides) {
    let env_allows = |key: &str| env_value(key).is_none();

    if env_allows("MEASUREMENTS_REDIS_URL") && env_allows("REDIS_URL") {
        if let Some(url) = overrides
            .redis_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            config.redis_url = url.to_string();
        }
    }
    if env_allows("MEASUREMENTS_CACHE_KEY_PREFIX") {
        if let Some(prefix) = overrides
            .cache_key_prefix
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            config.cache_key_prefix = prefix.to_string();
        }
    }
    if env_allows("MEASUREMENTS_VARIABLE_LIMIT") {
        if let Some(limit) = overrides.variable_limit.filter(|v| *v != 0) {
            config.variable_limit = limit;
        }
    }
    if env_allows("MEASUREMENTS_ROLLUP_TIMEZONE") {
        if let Some(tz) = overrides
            .rollup_timezone
            .as_deref()
            .and_then(|v| v.trim().parse::<Tz>().ok())
        {
            config.rollup_timezone = tz;
        }
    }
    if env_allows("MEASUREMENTS_RECENT_WINDOW_DAYS") {
        if let Some(days) = overrides.recent_window_days.filter(|v| *v > 0) {
            config.recent_window_days = days;
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub db_acquire_timeout_secs: u64,
    pub redis_url: String,
    pub redis_pool_size: usize,
    pub cache_key_prefix: String,
    pub variable_limit: usize,
    pub rollup_timezone: Tz,
    pub recent_window_days: i64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides();

        let database_url = env_value("MEASUREMENTS_DATABASE_URL")
            .or_else(|| env_value("DATABASE_URL"))
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| ov.database_url.as_deref())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|value| value.to_string())
            })
            .context("MEASUREMENTS_DATABASE_URL or DATABASE_URL is required (or present as database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let db_pool_size = env::var("MEASUREMENTS_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let db_acquire_timeout_secs = env::var("MEASUREMENTS_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(8);
        let redis_url = env_value("MEASUREMENTS_REDIS_URL")
            .or_else(|| env_value("REDIS_URL"))
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let redis_pool_size = env::var("MEASUREMENTS_REDIS_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(16);
        let cache_key_prefix = env_value("MEASUREMENTS_CACHE_KEY_PREFIX")
            .unwrap_or_else(|| "measurements".to_string());
        let variable_limit = env::var("MEASUREMENTS_VARIABLE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_VARIABLE_LIMIT);
        let rollup_timezone = match env_value("MEASUREMENTS_ROLLUP_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("invalid MEASUREMENTS_ROLLUP_TIMEZONE {name}"))?,
            None => DEFAULT_ROLLUP_TIMEZONE,
        };
        let recent_window_days = env::var("MEASUREMENTS_RECENT_WINDOW_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(10);
        let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let mut config = Self {
            database_url,
            db_pool_size,
            db_acquire_timeout_secs,
            redis_url,
            redis_pool_size,
            cache_key_prefix,
            variable_limit,
            rollup_timezone,
            recent_window_days,
            otlp_endpoint,
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides);
        }

        Ok(config)
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.recent_window_days)
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
