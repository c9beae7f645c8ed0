//! In-process queue backend and state store.

use crate::envelope::Envelope;
use crate::error::JobResult;
use crate::traits::{QueueBackend, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// State store backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string keys.
    pub fn value_len(&self) -> usize {
        self.values.lock().len()
    }

    /// Number of fields in hash `table`.
    pub fn hash_len(&self, table: &str) -> usize {
        self.hashes.lock().get(table).map_or(0, HashMap::len)
    }

    /// Members of `set`, sorted.
    pub fn members(&self, set: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .sets
            .lock()
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn value_set(&self, key: &str, value: &str) -> JobResult<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn value_get(&self, key: &str) -> JobResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn value_delete(&self, key: &str) -> JobResult<bool> {
        Ok(self.values.lock().remove(key).is_some())
    }

    async fn hash_set(&self, table: &str, field: &str, value: &str) -> JobResult<()> {
        self.hashes
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, table: &str, field: &str) -> JobResult<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .get(table)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_delete(&self, table: &str, field: &str) -> JobResult<bool> {
        Ok(self
            .hashes
            .lock()
            .get_mut(table)
            .is_some_and(|h| h.remove(field).is_some()))
    }

    async fn set_add(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self
            .sets
            .lock()
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self
            .sets
            .lock()
            .get_mut(set)
            .is_some_and(|s| s.remove(member)))
    }

    async fn set_contains(&self, set: &str, member: &str) -> JobResult<bool> {
        Ok(self
            .sets
            .lock()
            .get(set)
            .is_some_and(|s| s.contains(member)))
    }
}

#[derive(Debug, Clone)]
struct ScheduledItem {
    at: DateTime<Utc>,
    queue: String,
    payload: String,
}

#[derive(Debug, Default)]
struct Queues {
    ready: HashMap<String, VecDeque<String>>,
    // Kept sorted by `at`; equal times keep insertion order.
    scheduled: Vec<ScheduledItem>,
}

/// Queue backend holding canonical payloads in memory.
///
/// Envelopes are stored as their canonical payload text, so what a worker
/// dequeues went through the same serialization as over Redis.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    queues: Mutex<Queues>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ready envelopes on `queue`, oldest first.
    pub fn queued(&self, queue: &str) -> Vec<Envelope> {
        self.queues
            .lock()
            .ready
            .get(queue)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| Envelope::from_payload(p).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Scheduled envelopes for `queue` with their due times, soonest first.
    pub fn scheduled(&self, queue: &str) -> Vec<(DateTime<Utc>, Envelope)> {
        self.queues
            .lock()
            .scheduled
            .iter()
            .filter(|item| item.queue == queue)
            .filter_map(|item| Envelope::from_payload(&item.payload).ok().map(|e| (item.at, e)))
            .collect()
    }

    /// Number of ready envelopes on `queue`.
    pub fn queue_size(&self, queue: &str) -> usize {
        self.queues.lock().ready.get(queue).map_or(0, VecDeque::len)
    }

    /// Number of scheduled envelopes across all queues.
    pub fn schedule_size(&self) -> usize {
        self.queues.lock().scheduled.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut queues = self.queues.lock();
        queues.ready.clear();
        queues.scheduled.clear();
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, queue: &str, envelope: &Envelope) -> JobResult<()> {
        let payload = envelope.to_payload()?;
        self.queues
            .lock()
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn enqueue_at(
        &self,
        queue: &str,
        at: DateTime<Utc>,
        envelope: &Envelope,
    ) -> JobResult<()> {
        let item = ScheduledItem {
            at,
            queue: queue.to_string(),
            payload: envelope.to_payload()?,
        };
        let mut queues = self.queues.lock();
        let index = queues.scheduled.partition_point(|existing| existing.at <= at);
        queues.scheduled.insert(index, item);
        Ok(())
    }

    async fn delayed_job_exists(&self, queue: &str, envelope: &Envelope) -> JobResult<bool> {
        let payload = envelope.to_payload()?;
        Ok(self
            .queues
            .lock()
            .scheduled
            .iter()
            .any(|item| item.queue == queue && item.payload == payload))
    }

    async fn dequeue(&self, queue: &str) -> JobResult<Option<Envelope>> {
        let payload = self
            .queues
            .lock()
            .ready
            .get_mut(queue)
            .and_then(VecDeque::pop_front);
        payload.map(|p| Envelope::from_payload(&p)).transpose()
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> JobResult<usize> {
        let mut queues = self.queues.lock();
        let due = queues.scheduled.partition_point(|item| item.at <= now);
        let promoted: Vec<ScheduledItem> = queues.scheduled.drain(..due).collect();
        for item in &promoted {
            queues
                .ready
                .entry(item.queue.clone())
                .or_default()
                .push_back(item.payload.clone());
        }
        Ok(promoted.len())
    }
}
