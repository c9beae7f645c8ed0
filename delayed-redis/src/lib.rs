//! # delayed-redis
//!
//! Pooled Redis access shared by the job state store and queue backend.
//!
//! ```rust,ignore
//! use delayed_redis::{RedisConfig, RedisService};
//!
//! let redis = RedisService::new(RedisConfig::from_env().build()).await?;
//! redis.hset("unique_jobs", "digest", "default_4f1c...").await?;
//! let last: Option<String> = redis.hget("unique_jobs", "digest").await?;
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};

// Re-export redis crate for pipelines
pub use redis;
