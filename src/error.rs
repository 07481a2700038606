use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Rejected before touching the store or the cache.
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("variable limit of {limit} reached for project {project}")]
    LimitExceeded { project: String, limit: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("cache pool error: {0}")]
    CachePool(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Infrastructure failures are worth retrying as a whole call; input problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Cache(_) | Self::CachePool(_)
        )
    }
}

impl From<deadpool_redis::PoolError> for CoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Backend(err) => Self::Cache(err),
            other => Self::CachePool(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(CoreError::CachePool("timed out".into()).is_retryable());
        assert!(CoreError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!CoreError::validation("bad interval").is_retryable());
        assert!(!CoreError::LimitExceeded {
            project: "p".into(),
            limit: 1
        }
        .is_retryable());
        assert!(!CoreError::not_found("variable").is_retryable());
    }
}
