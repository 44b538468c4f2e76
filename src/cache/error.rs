use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache backend did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("cache backend is closed")]
    Closed,
    #[error("cache configuration error: {0}")]
    Configuration(String),
}
