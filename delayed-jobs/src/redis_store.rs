//! Redis state store and queue backend.
//!
//! Key layout, with `<p>` the configured prefix:
//!
//! | key | type | contents |
//! |---|---|---|
//! | `<p>:meta:<call>` | string | JSON metadata for a call |
//! | `<p>:<unique_jobs_table>` | hash | dedup key -> latest job id |
//! | `<p>:<tracked_jobs_set>` | set | tracking tags |
//! | `<p>:queues` | set | queue names seen |
//! | `<p>:queue:<name>` | list | ready payloads |
//! | `<p>:delayed_queue_schedule` | zset | epoch second -> same |
//! | `<p>:delayed:<ts>` | list | scheduled items due at `ts` |
//! | `<p>:timestamps:<item>` | set | `delayed:<ts>` keys holding `item` |
//!
//! A scheduled item is the canonical JSON `{"payload": <envelope>, "queue": <name>}`,
//! so identical envelopes for the same queue map to the same reverse index.

use crate::config::DelayConfig;
use crate::envelope::{Envelope, canonicalize};
use crate::error::{JobError, JobResult};
use crate::traits::{QueueBackend, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delayed_log::{debug, warn};
use delayed_redis::RedisService;
use delayed_redis::redis::Script;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// [`StateStore`] over Redis hashes and sets.
#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RedisService>,
    config: DelayConfig,
}

impl RedisStore {
    /// Store writing under `config.key_prefix`.
    pub fn new(redis: Arc<RedisService>, config: DelayConfig) -> Self {
        Self { redis, config }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn value_set(&self, key: &str, value: &str) -> JobResult<()> {
        self.redis.set_value(&self.config.key(key), value).await?;
        Ok(())
    }

    async fn value_get(&self, key: &str) -> JobResult<Option<String>> {
        Ok(self.redis.get_value(&self.config.key(key)).await?)
    }

    async fn value_delete(&self, key: &str) -> JobResult<bool> {
        Ok(self.redis.del(&self.config.key(key)).await?)
    }

    async fn hash_set(&self, table: &str, field: &str, value: &str) -> JobResult<()> {
        self.redis.hset(&self.config.key(table), field, value).await?;
        Ok(())
    }

    async fn hash_get(&self, table: &str, field: &str) -> JobResult<Option<String>> {
        Ok(self.redis.hget(&self.config.key(table), field).await?)
    }

    async fn hash_delete(&self, table: &str, field: &str) -> JobResult<bool> {
        Ok(self.redis.hdel(&self.config.key(table), field).await?)
    }

    async fn set_add(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self.redis.sadd(&self.config.key(set), member).await?)
    }

    async fn set_remove(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self.redis.srem(&self.config.key(set), member).await?)
    }

    async fn set_contains(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self.redis.sismember(&self.config.key(set), member).await?)
    }
}

#[derive(Deserialize)]
struct ScheduledItem {
    queue: String,
    payload: Envelope,
}

// KEYS: delayed list, reverse index, queue set, ready list.
// ARGV: scheduled item, `delayed:<ts>`, queue name, ready payload.
const PROMOTE_ITEM: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('SREM', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[3])
redis.call('RPUSH', KEYS[4], ARGV[4])
return 1
"#;

/// [`QueueBackend`] using the resque-scheduler layout described above.
///
/// Promotion reads the head of a `delayed:<ts>` list, then moves it with
/// one Lua script that removes it from the list, clears its reverse index
/// entry and pushes the envelope onto the ready list. A dropped connection
/// leaves the item scheduled, and concurrent workers promote it once.
#[derive(Clone)]
pub struct RedisBackend {
    redis: Arc<RedisService>,
    config: DelayConfig,
    promote_script: Script,
}

impl RedisBackend {
    /// Backend writing under `config.key_prefix`.
    pub fn new(redis: Arc<RedisService>, config: DelayConfig) -> Self {
        Self {
            redis,
            config,
            promote_script: Script::new(PROMOTE_ITEM),
        }
    }

    fn queue_key(&self, queue: &str) -> String {
        self.config.key(&format!("queue:{}", queue))
    }

    fn schedule_key(&self) -> String {
        self.config.key("delayed_queue_schedule")
    }

    // Unprefixed; stored in the reverse index as-is.
    fn timestamp_suffix(ts: i64) -> String {
        format!("delayed:{}", ts)
    }

    fn timestamps_key(&self, item: &str) -> String {
        self.config.key(&format!("timestamps:{}", item))
    }

    fn scheduled_item(queue: &str, envelope: &Envelope) -> JobResult<String> {
        let item = canonicalize(json!({
            "queue": queue,
            "payload": envelope.to_canonical_value()?,
        }));
        serde_json::to_string(&item).map_err(|e| JobError::Serialization(e.to_string()))
    }

    /// Ready payloads on `queue`.
    pub async fn queue_size(&self, queue: &str) -> JobResult<u64> {
        Ok(self.redis.llen(&self.queue_key(queue)).await?)
    }

    /// Distinct timestamps with scheduled items.
    pub async fn schedule_size(&self) -> JobResult<u64> {
        Ok(self.redis.zcard(&self.schedule_key()).await?)
    }

    async fn promote_timestamp(&self, ts: i64) -> JobResult<usize> {
        let suffix = Self::timestamp_suffix(ts);
        let list_key = self.config.key(&suffix);
        let mut moved = 0;

        while let Some(item) = self.redis.lindex::<String>(&list_key, 0).await? {
            let timestamps_key = self.timestamps_key(&item);
            let scheduled: ScheduledItem = match serde_json::from_str(&item) {
                Ok(scheduled) => scheduled,
                Err(e) => {
                    warn!("Dropping unreadable scheduled item at {}: {}", ts, e);
                    let mut pipe = delayed_redis::redis::pipe();
                    pipe.atomic()
                        .lrem(&list_key, 1, &item)
                        .ignore()
                        .srem(&timestamps_key, &suffix)
                        .ignore();
                    self.redis.pipeline::<()>(&pipe).await?;
                    continue;
                }
            };

            let mut invocation = self.promote_script.prepare_invoke();
            invocation
                .key(&list_key)
                .key(&timestamps_key)
                .key(self.config.key("queues"))
                .key(self.queue_key(&scheduled.queue))
                .arg(&item)
                .arg(&suffix)
                .arg(&scheduled.queue)
                .arg(scheduled.payload.to_payload()?);

            // 0 when another worker promoted the same item first.
            let promoted: i64 = self.redis.invoke(&invocation).await?;
            if promoted == 1 {
                moved += 1;
            }
        }

        // An item scheduled for `ts` after the drain keeps its zset entry.
        if self.redis.llen(&list_key).await? == 0 {
            self.redis.zrem(&self.schedule_key(), ts).await?;
        }
        Ok(moved)
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn enqueue(&self, queue: &str, envelope: &Envelope) -> JobResult<()> {
        let mut pipe = delayed_redis::redis::pipe();
        pipe.atomic()
            .sadd(self.config.key("queues"), queue)
            .ignore()
            .rpush(self.queue_key(queue), envelope.to_payload()?)
            .ignore();
        self.redis.pipeline::<()>(&pipe).await?;
        Ok(())
    }

    async fn enqueue_at(
        &self,
        queue: &str,
        at: DateTime<Utc>,
        envelope: &Envelope,
    ) -> JobResult<()> {
        let ts = at.timestamp();
        let suffix = Self::timestamp_suffix(ts);
        let item = Self::scheduled_item(queue, envelope)?;

        let mut pipe = delayed_redis::redis::pipe();
        pipe.atomic()
            .rpush(self.config.key(&suffix), &item)
            .ignore()
            .zadd(self.schedule_key(), ts, ts)
            .ignore()
            .sadd(self.timestamps_key(&item), &suffix)
            .ignore();
        self.redis.pipeline::<()>(&pipe).await?;

        debug!("Scheduled {} on {} at {}", envelope.display_name(), queue, ts);
        Ok(())
    }

    async fn delayed_job_exists(&self, queue: &str, envelope: &Envelope) -> JobResult<bool> {
        let item = Self::scheduled_item(queue, envelope)?;
        Ok(self.redis.exists(&self.timestamps_key(&item)).await?)
    }

    async fn dequeue(&self, queue: &str) -> JobResult<Option<Envelope>> {
        let payload: Option<String> = self.redis.lpop(&self.queue_key(queue)).await?;
        payload.map(|p| Envelope::from_payload(&p)).transpose()
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> JobResult<usize> {
        let due: Vec<i64> = self
            .redis
            .zrange_until(&self.schedule_key(), now.timestamp())
            .await?;

        let mut moved = 0;
        for ts in due {
            moved += self.promote_timestamp(ts).await?;
        }
        Ok(moved)
    }
}
