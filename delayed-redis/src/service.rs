//! Pooled Redis service with the commands the job crates rely on.

use redis::{AsyncCommands, FromRedisValue, ToSingleRedisArg};
use std::future::Future;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Redis service: a connection pool plus timed convenience commands.
///
/// Every command is bounded by [`RedisConfig::command_timeout`].
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Connect and build the pool.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self { config, pool }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Check out a connection.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// PING the server.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = self.timed(redis::cmd("PING").query_async(&mut *conn)).await?;
        Ok(())
    }

    /// Pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    async fn timed<T>(&self, command: impl Future<Output = redis::RedisResult<T>>) -> Result<T> {
        tokio::time::timeout(self.config.command_timeout, command)
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(RedisError::from)
    }

    /// Run a pipeline (use `.atomic()` for MULTI/EXEC).
    pub async fn pipeline<T: FromRedisValue>(&self, pipe: &redis::Pipeline) -> Result<T> {
        let mut conn = self.get().await?;
        self.timed(pipe.query_async(&mut *conn)).await
    }

    /// GET a string value.
    pub async fn get_value<T: FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.get(key)).await
    }

    /// SET a string value.
    pub async fn set_value<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Result<()> {
        let mut conn = self.get().await?;
        let _: () = self.timed(conn.set(key, value)).await?;
        Ok(())
    }

    /// DEL a single key. Returns whether it existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let removed: u64 = self.timed(conn.del(key)).await?;
        Ok(removed > 0)
    }

    /// Invoke a Lua script, loading it first if the server lacks it.
    pub async fn invoke<T: FromRedisValue>(
        &self,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> Result<T> {
        let mut conn = self.get().await?;
        self.timed(invocation.invoke_async(&mut *conn)).await
    }

    /// HGET.
    pub async fn hget<T: FromRedisValue>(&self, key: &str, field: &str) -> Result<Option<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.hget(key, field)).await
    }

    /// HSET.
    pub async fn hset<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        field: &str,
        value: T,
    ) -> Result<()> {
        let mut conn = self.get().await?;
        let _: () = self.timed(conn.hset(key, field, value)).await?;
        Ok(())
    }

    /// HDEL. Returns whether the field existed.
    pub async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let removed: u32 = self.timed(conn.hdel(key, field)).await?;
        Ok(removed > 0)
    }

    /// SADD a single member. Returns whether it was new.
    pub async fn sadd<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        member: T,
    ) -> Result<bool> {
        let mut conn = self.get().await?;
        let added: u64 = self.timed(conn.sadd(key, member)).await?;
        Ok(added > 0)
    }

    /// SREM a single member. Returns whether it was present.
    pub async fn srem<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        member: T,
    ) -> Result<bool> {
        let mut conn = self.get().await?;
        let removed: u64 = self.timed(conn.srem(key, member)).await?;
        Ok(removed > 0)
    }

    /// SISMEMBER.
    pub async fn sismember<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        member: T,
    ) -> Result<bool> {
        let mut conn = self.get().await?;
        self.timed(conn.sismember(key, member)).await
    }

    /// EXISTS.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        self.timed(conn.exists(key)).await
    }

    /// RPUSH a single value. Returns the new length.
    pub async fn rpush<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        value: T,
    ) -> Result<u64> {
        let mut conn = self.get().await?;
        self.timed(conn.rpush(key, value)).await
    }

    /// LPOP a single value.
    pub async fn lpop<T: FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.lpop(key, None)).await
    }

    /// LINDEX.
    pub async fn lindex<T: FromRedisValue>(&self, key: &str, index: isize) -> Result<Option<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.lindex(key, index)).await
    }

    /// LRANGE over the whole list.
    pub async fn lrange_all<T: FromRedisValue>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.lrange(key, 0, -1)).await
    }

    /// ZRANGEBYSCORE from `-inf` to `max`.
    pub async fn zrange_until<T: FromRedisValue>(&self, key: &str, max: i64) -> Result<Vec<T>> {
        let mut conn = self.get().await?;
        self.timed(conn.zrangebyscore(key, "-inf", max)).await
    }

    /// ZCARD.
    pub async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.get().await?;
        self.timed(conn.zcard(key)).await
    }

    /// ZREM a single member. Returns whether it was present.
    pub async fn zrem<T: ToSingleRedisArg + Send + Sync>(
        &self,
        key: &str,
        member: T,
    ) -> Result<bool> {
        let mut conn = self.get().await?;
        let removed: u64 = self.timed(conn.zrem(key, member)).await?;
        Ok(removed > 0)
    }

    /// LLEN.
    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.get().await?;
        self.timed(conn.llen(key)).await
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}
