//! Error types for the Redis-backed dedup store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisDedupError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RedisDedupError>;
