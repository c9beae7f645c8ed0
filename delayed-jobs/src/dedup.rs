//! Dedup keys and the registry of the latest unique job instance.
//!
//! Every unique enqueue overwrites the registry entry for its key with a
//! fresh instance id, so the last write wins. A worker only runs a unique
//! envelope whose id still matches the registry; older copies left in the
//! queue become no-ops.
//!
//! The executor's read-then-delete is two separate store calls. A unique
//! enqueue landing between them has its entry deleted and its envelope then
//! runs as a stale duplicate. This race is accepted.

use crate::config::{DelayConfig, UniqueScope};
use crate::envelope::Envelope;
use crate::error::{JobError, JobResult};
use crate::traits::StateStore;
use delayed_log::debug;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// SHA-256 hex digest identifying one logical job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Digest of the envelope's identity fields, optionally scoped to `queue`.
    ///
    /// `t` and `job_id` never contribute.
    pub fn compute(envelope: &Envelope, queue: Option<&str>) -> JobResult<Self> {
        let identity = envelope.identity().to_canonical_value()?;
        let material = match queue {
            Some(queue) => json!({ "queue": queue, "job": identity }),
            None => identity,
        };
        let bytes =
            serde_json::to_vec(&material).map_err(|e| JobError::Serialization(e.to_string()))?;
        Ok(Self(hex::encode(Sha256::digest(&bytes))))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh instance id, `<queue>_<uuid>`. The queue part is only for people
/// reading the registry.
pub fn new_instance_id(queue: &str) -> String {
    format!("{}_{}", queue, Uuid::new_v4())
}

/// Dedup registry over a [`StateStore`] hash.
#[derive(Clone)]
pub struct DedupRegistry {
    store: Arc<dyn StateStore>,
    table: String,
    scope: UniqueScope,
}

impl DedupRegistry {
    /// Registry using the table and scope from `config`.
    pub fn new(store: Arc<dyn StateStore>, config: &DelayConfig) -> Self {
        Self {
            store,
            table: config.unique_jobs_table.clone(),
            scope: config.unique_scope,
        }
    }

    /// Hash name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Key for `envelope` on `queue` under the configured scope.
    pub fn key_for(&self, queue: &str, envelope: &Envelope) -> JobResult<DedupKey> {
        let scope = match self.scope {
            UniqueScope::Queue => Some(queue),
            UniqueScope::Global => None,
        };
        DedupKey::compute(envelope, scope)
    }

    /// Record `envelope` as the latest instance of its job.
    pub async fn track(&self, queue: &str, envelope: &Envelope) -> JobResult<DedupKey> {
        let instance_id = envelope
            .job_instance_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                JobError::InvalidEnvelope(format!(
                    "{} has no job id to track",
                    envelope.display_name()
                ))
            })?;

        let key = self.key_for(queue, envelope)?;
        self.store
            .hash_set(&self.table, key.as_str(), instance_id)
            .await?;
        debug!("Tracked unique job {} as {}", key, instance_id);
        Ok(key)
    }

    /// Drop the registry entry for `envelope`'s job.
    pub async fn untrack(&self, queue: &str, envelope: &Envelope) -> JobResult<bool> {
        let key = self.key_for(queue, envelope)?;
        self.store.hash_delete(&self.table, key.as_str()).await
    }

    /// Latest instance id enqueued for `envelope`'s job.
    pub async fn last_instance_id(
        &self,
        queue: &str,
        envelope: &Envelope,
    ) -> JobResult<Option<String>> {
        let key = self.key_for(queue, envelope)?;
        self.store.hash_get(&self.table, key.as_str()).await
    }

    /// Whether `envelope` was dispatched as unique.
    pub fn is_unique(&self, envelope: &Envelope) -> bool {
        envelope.is_unique()
    }

    /// Whether `envelope` is unique and is the latest instance of its job.
    pub async fn is_last(&self, queue: &str, envelope: &Envelope) -> JobResult<bool> {
        if !envelope.is_unique() {
            return Ok(false);
        }
        let last = self.last_instance_id(queue, envelope).await?;
        Ok(last.is_some() && last == envelope.job_instance_id)
    }
}
