//! Error types for dispatch and execution.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Error raised by a receiver's method.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Job errors.
///
/// A stale unique duplicate and a vanished entity are not errors; the
/// executor reports them as [`Outcome`](crate::Outcome) variants.
#[derive(Debug, Error)]
pub enum JobError {
    /// The receiver does not answer the requested method.
    #[error("undefined method `{method}` for {receiver}")]
    UnknownMethod {
        /// Receiver name.
        receiver: String,
        /// Requested method.
        method: String,
    },

    /// No receiver is registered under this name.
    #[error("No receiver registered for: {0}")]
    UnknownReceiver(String),

    /// A class or entity reference is malformed.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// An extra param uses a reserved envelope key.
    #[error("Param key `{0}` is reserved by the envelope")]
    InvalidParam(String),

    /// A dequeued payload cannot be executed.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Redis error
    #[error(transparent)]
    Redis(#[from] delayed_redis::RedisError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure raised by the invoked method, passed through untouched.
    #[error(transparent)]
    Perform(BoxError),

    /// Worker not running
    #[error("Worker not running")]
    WorkerNotRunning,

    /// Worker already running
    #[error("Worker already running")]
    WorkerAlreadyRunning,
}

impl JobError {
    /// The receiver's own error, if this is one.
    pub fn perform_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Perform(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
