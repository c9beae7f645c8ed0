//! Per-call metadata kept beside the queue.
//!
//! A caller can attach a JSON document to a receiver name plus argument
//! list, then load or delete it later from anywhere holding the same call,
//! typically the method once it runs. The key is `meta:` followed by the
//! canonical JSON `{"args": [...], "class": <receiver>}` with arguments in
//! wire form, so equal calls share one entry regardless of how they were
//! built.

use crate::envelope::canonicalize;
use crate::error::{JobError, JobResult};
use crate::reference::Reference;
use crate::traits::StateStore;
use delayed_log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// Prefix of metadata keys.
pub const META_PREFIX: &str = "meta:";

/// Metadata documents over a [`StateStore`].
#[derive(Clone)]
pub struct MetaStore {
    store: Arc<dyn StateStore>,
}

impl MetaStore {
    /// Metadata store over `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Key for `receiver` called with `args`.
    pub fn key(receiver: &str, args: &[Reference]) -> JobResult<String> {
        let args = args
            .iter()
            .map(Reference::encode)
            .collect::<JobResult<Vec<Value>>>()?;
        let material = canonicalize(json!({ "class": receiver, "args": args }));
        let encoded =
            serde_json::to_string(&material).map_err(|e| JobError::Serialization(e.to_string()))?;
        Ok(format!("{}{}", META_PREFIX, encoded))
    }

    /// Store `meta` for the call, replacing any earlier document.
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        receiver: &str,
        args: &[Reference],
        meta: &T,
    ) -> JobResult<()> {
        let key = Self::key(receiver, args)?;
        let value =
            serde_json::to_string(meta).map_err(|e| JobError::Serialization(e.to_string()))?;
        self.store.value_set(&key, &value).await
    }

    /// Load the document stored for the call.
    pub async fn load<T: DeserializeOwned>(
        &self,
        receiver: &str,
        args: &[Reference],
    ) -> JobResult<Option<T>> {
        let key = Self::key(receiver, args)?;
        let Some(raw) = self.store.value_get(&key).await? else {
            debug!("No meta data at {}", key);
            return Ok(None);
        };

        debug!("Loaded meta data {} {}", key, raw);
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| JobError::Deserialization(format!("meta data at {}: {}", key, e)))
    }

    /// Delete the document for the call. Returns whether one existed.
    pub async fn delete(&self, receiver: &str, args: &[Reference]) -> JobResult<bool> {
        let key = Self::key(receiver, args)?;
        self.store.value_delete(&key).await
    }
}
