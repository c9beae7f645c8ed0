//! Dispatcher and executor settings.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};

/// Whether unique jobs on different queues can be duplicates of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniqueScope {
    /// The queue name is part of the dedup key.
    #[default]
    Queue,
    /// Identical calls collide across queues.
    Global,
}

impl UniqueScope {
    /// Parse `queue` or `global`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Some(Self::Queue),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

/// Settings shared by producers and workers. Both sides must agree on
/// `unique_scope`, `unique_jobs_table` and `key_prefix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Queue used when neither the call nor the receiver names one.
    pub default_queue: String,
    /// Queue scoping of the dedup key.
    pub unique_scope: UniqueScope,
    /// Hash holding dedup key -> latest job id.
    pub unique_jobs_table: String,
    /// Set holding outstanding tracking tags.
    pub tracked_jobs_set: String,
    /// Prefix for every key the Redis store and backend write.
    pub key_prefix: String,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            unique_scope: UniqueScope::default(),
            unique_jobs_table: "unique_jobs".to_string(),
            tracked_jobs_set: "tracked_jobs".to_string(),
            key_prefix: "delayed".to_string(),
        }
    }
}

impl DelayConfig {
    /// Create a builder.
    pub fn builder() -> DelayConfigBuilder {
        DelayConfigBuilder::new()
    }

    /// Builder seeded from `DELAYED_DEFAULT_QUEUE`, `DELAYED_UNIQUE_SCOPE`,
    /// `DELAYED_UNIQUE_TABLE`, `DELAYED_TRACKING_SET` and `DELAYED_KEY_PREFIX`.
    pub fn from_env() -> JobResult<DelayConfigBuilder> {
        let mut builder = DelayConfigBuilder::new();

        if let Ok(queue) = std::env::var("DELAYED_DEFAULT_QUEUE") {
            builder = builder.default_queue(queue);
        }

        if let Ok(scope) = std::env::var("DELAYED_UNIQUE_SCOPE") {
            let scope = UniqueScope::parse(&scope).ok_or_else(|| {
                JobError::Config(format!(
                    "DELAYED_UNIQUE_SCOPE must be `queue` or `global`, got `{}`",
                    scope
                ))
            })?;
            builder = builder.unique_scope(scope);
        }

        if let Ok(table) = std::env::var("DELAYED_UNIQUE_TABLE") {
            builder = builder.unique_jobs_table(table);
        }

        if let Ok(set) = std::env::var("DELAYED_TRACKING_SET") {
            builder = builder.tracked_jobs_set(set);
        }

        if let Ok(prefix) = std::env::var("DELAYED_KEY_PREFIX") {
            builder = builder.key_prefix(prefix);
        }

        Ok(builder)
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```
    /// use delayed_jobs::{DelayConfig, UniqueScope};
    ///
    /// let config = DelayConfig::from_toml_str(r#"
    ///     default_queue = "mailers"
    ///     unique_scope = "global"
    /// "#).unwrap();
    ///
    /// assert_eq!(config.default_queue, "mailers");
    /// assert_eq!(config.unique_scope, UniqueScope::Global);
    /// assert_eq!(config.unique_jobs_table, "unique_jobs");
    /// ```
    pub fn from_toml_str(content: &str) -> JobResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| JobError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject empty names.
    pub fn validate(&self) -> JobResult<()> {
        for (name, value) in [
            ("default_queue", &self.default_queue),
            ("unique_jobs_table", &self.unique_jobs_table),
            ("tracked_jobs_set", &self.tracked_jobs_set),
        ] {
            if value.trim().is_empty() {
                return Err(JobError::Config(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }

    /// Prefix `suffix` with [`DelayConfig::key_prefix`].
    pub fn key(&self, suffix: &str) -> String {
        if self.key_prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.key_prefix, suffix)
        }
    }
}

/// Builder for [`DelayConfig`].
#[derive(Debug, Default)]
pub struct DelayConfigBuilder {
    config: DelayConfig,
}

impl DelayConfigBuilder {
    /// Builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default queue.
    pub fn default_queue(mut self, queue: impl Into<String>) -> Self {
        self.config.default_queue = queue.into();
        self
    }

    /// Set the unique scope.
    pub fn unique_scope(mut self, scope: UniqueScope) -> Self {
        self.config.unique_scope = scope;
        self
    }

    /// Set the dedup registry hash name.
    pub fn unique_jobs_table(mut self, table: impl Into<String>) -> Self {
        self.config.unique_jobs_table = table.into();
        self
    }

    /// Set the tracking set name.
    pub fn tracked_jobs_set(mut self, set: impl Into<String>) -> Self {
        self.config.tracked_jobs_set = set.into();
        self
    }

    /// Set the Redis key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Build and validate.
    pub fn build(self) -> JobResult<DelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
