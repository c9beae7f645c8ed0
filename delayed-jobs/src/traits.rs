//! Collaborator traits: the queue backend and the shared state store.

use crate::envelope::Envelope;
use crate::error::JobResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Transport that holds envelopes until a worker takes them.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append to `queue` for immediate processing.
    async fn enqueue(&self, queue: &str, envelope: &Envelope) -> JobResult<()>;

    /// Hold until `at`, then move to `queue`.
    async fn enqueue_at(&self, queue: &str, at: DateTime<Utc>, envelope: &Envelope)
    -> JobResult<()>;

    /// Hold for `delay`, then move to `queue`.
    async fn enqueue_in(&self, queue: &str, delay: Duration, envelope: &Envelope) -> JobResult<()> {
        self.enqueue_at(queue, Utc::now() + delay, envelope).await
    }

    /// Whether an identical envelope is waiting in the delayed schedule for
    /// `queue`.
    async fn delayed_job_exists(&self, queue: &str, envelope: &Envelope) -> JobResult<bool>;

    /// Take the next ready envelope from `queue`.
    async fn dequeue(&self, queue: &str) -> JobResult<Option<Envelope>>;

    /// Move every scheduled envelope due at `now` onto its queue. Returns
    /// how many moved.
    async fn promote_due(&self, now: DateTime<Utc>) -> JobResult<usize>;
}

/// Key-value store with atomic single-key string, hash and set operations.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Set string `key`, overwriting.
    async fn value_set(&self, key: &str, value: &str) -> JobResult<()>;

    /// Read string `key`.
    async fn value_get(&self, key: &str) -> JobResult<Option<String>>;

    /// Remove string `key`. Returns whether it existed.
    async fn value_delete(&self, key: &str) -> JobResult<bool>;

    /// Set `field` in hash `table`, overwriting.
    async fn hash_set(&self, table: &str, field: &str, value: &str) -> JobResult<()>;

    /// Read `field` from hash `table`.
    async fn hash_get(&self, table: &str, field: &str) -> JobResult<Option<String>>;

    /// Remove `field` from hash `table`. Returns whether it existed.
    async fn hash_delete(&self, table: &str, field: &str) -> JobResult<bool>;

    /// Add `member` to `set`. Returns whether it was new.
    async fn set_add(&self, set: &str, member: &str) -> JobResult<bool>;

    /// Remove `member` from `set`. Returns whether it was present.
    async fn set_remove(&self, set: &str, member: &str) -> JobResult<bool>;

    /// Whether `member` is in `set`.
    async fn set_contains(&self, set: &str, member: &str) -> JobResult<bool>;
}
