//! Redis error types.

use thiserror::Error;

/// Result type for Redis operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis errors.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Could not reach the server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool exhausted or broken.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Command rejected by the server.
    #[error("Command error: {0}")]
    Command(String),

    /// Invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command exceeded the configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Pool(_))
    }

    /// Whether this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl<E> From<bb8::RunError<E>> for RedisError
where
    E: std::error::Error + 'static,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::TimedOut => Self::Timeout,
            other => Self::Pool(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
