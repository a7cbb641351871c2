//! Redis error types for the local adapter.

use crate::error::RepositoryError;
use deadpool_redis::CreatePoolError;
use thiserror::Error;

pub type RedisError = deadpool_redis::redis::RedisError;
pub type PoolError = deadpool_redis::PoolError;

#[derive(Debug, Error)]
pub enum RedisAdapterError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Create pool error: {0}")]
    CreatePool(String),
}

impl From<CreatePoolError> for RedisAdapterError {
    fn from(err: CreatePoolError) -> Self {
        RedisAdapterError::CreatePool(err.to_string())
    }
}

impl From<RedisAdapterError> for RepositoryError {
    fn from(err: RedisAdapterError) -> Self {
        RepositoryError::Backend(err.to_string())
    }
}
