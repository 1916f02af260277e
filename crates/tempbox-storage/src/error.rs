use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
