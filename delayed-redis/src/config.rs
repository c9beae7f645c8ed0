//! Redis connection settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (`redis://host:port`, or `rediss://` for TLS).
    pub url: String,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Idle connections kept open.
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Time allowed to obtain a connection.
    #[serde(with = "secs", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Time allowed for a single command round-trip.
    #[serde(with = "secs", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Database number.
    #[serde(default)]
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    #[serde(default)]
    pub username: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Use TLS.
    #[serde(default)]
    pub tls: bool,
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: default_pool_size(),
            min_idle: Some(1),
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
            database: None,
            username: None,
            password: None,
            tls: false,
        }
    }
}

impl RedisConfig {
    /// Configuration for `url` with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Builder seeded from `REDIS_URL`, `REDIS_POOL_SIZE`, `REDIS_DATABASE`,
    /// `REDIS_USERNAME`, `REDIS_PASSWORD` and `REDIS_TLS`.
    pub fn from_env() -> RedisConfigBuilder {
        let mut builder = RedisConfigBuilder::new();

        if let Ok(url) = std::env::var("REDIS_URL") {
            builder = builder.url(url);
        }

        if let Ok(pool_size) = std::env::var("REDIS_POOL_SIZE")
            && let Ok(size) = pool_size.parse()
        {
            builder = builder.pool_size(size);
        }

        if let Ok(db) = std::env::var("REDIS_DATABASE")
            && let Ok(db_num) = db.parse()
        {
            builder = builder.database(db_num);
        }

        if let Ok(username) = std::env::var("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if std::env::var("REDIS_TLS").is_ok() {
            builder = builder.tls(true);
        }

        builder
    }

    /// Full URL including credentials and database.
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();

        if let Some(password) = &self.password {
            let auth = match &self.username {
                Some(username) => format!("{}:{}@", username, password),
                None => format!(":{}@", password),
            };
            for scheme in ["rediss://", "redis://"] {
                if let Some(rest) = url.strip_prefix(scheme) {
                    url = format!("{}{}{}", scheme, auth, rest);
                    break;
                }
            }
        }

        if let Some(db) = self.database {
            let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(&url);
            if !after_scheme.contains('/') {
                url = format!("{}/{}", url, db);
            }
        }

        url
    }
}

/// Builder for [`RedisConfig`].
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        if self.config.tls {
            self = self.tls(true);
        }
        self
    }

    /// Set the pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the minimum idle connections.
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Set the ACL username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Enable TLS, switching a `redis://` URL to `rediss://`.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.tls = enabled;
        if enabled && self.config.url.starts_with("redis://") {
            self.config.url = self.config.url.replacen("redis://", "rediss://", 1);
        }
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
