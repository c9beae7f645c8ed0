//! Tracking tags: caller-managed markers for outstanding jobs.
//!
//! A tag is added when a tracked job is dispatched and stays until the
//! caller removes it. Running the job does not clear it.

use crate::config::DelayConfig;
use crate::error::JobResult;
use crate::traits::StateStore;
use std::sync::Arc;

/// Set of outstanding tracking tags.
#[derive(Clone)]
pub struct TrackingStore {
    store: Arc<dyn StateStore>,
    set: String,
}

impl TrackingStore {
    /// Tracking store using the set name from `config`.
    pub fn new(store: Arc<dyn StateStore>, config: &DelayConfig) -> Self {
        Self {
            store,
            set: config.tracked_jobs_set.clone(),
        }
    }

    /// Mark `tag` outstanding.
    pub async fn track(&self, tag: &str) -> JobResult<()> {
        self.store.set_add(&self.set, tag).await?;
        Ok(())
    }

    /// Clear `tag`.
    pub async fn untrack(&self, tag: &str) -> JobResult<()> {
        self.store.set_remove(&self.set, tag).await?;
        Ok(())
    }

    /// Whether `tag` is outstanding.
    pub async fn is_tracked(&self, tag: &str) -> JobResult<bool> {
        self.store.set_contains(&self.set, tag).await
    }
}
