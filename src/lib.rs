// Delayed - deferred method execution for Rust
//
// This library turns method calls into durable job envelopes, hands them to a
// queue backend, and runs them later through a registry of receivers.

// Re-export core functionality
pub use delayed_jobs::*;

// Re-export member crates
pub use delayed_jobs;
pub use delayed_log;
pub use delayed_redis;

pub use delayed_redis::{RedisConfig, RedisError, RedisService};

// Re-export commonly used dependencies
pub use async_trait::async_trait;
pub use chrono;
pub use serde_json;

// Prelude for common imports
pub mod prelude {
    pub use delayed_jobs::prelude::*;

    pub use crate::{RedisConfig, RedisService};
    pub use async_trait::async_trait;
}
