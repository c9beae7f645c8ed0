//! Decoding envelope references back into live values.

use crate::error::JobResult;
use crate::reference::{Entity, Reference, Resolved};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Loads persisted entities by kind and id.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// `Ok(None)` means the entity no longer exists.
    async fn resolve(&self, kind: &str, id: &str) -> JobResult<Option<Arc<dyn Entity>>>;
}

/// Result of decoding one wire value.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// The value is ready to use.
    Found(Resolved),
    /// The referenced entity was removed after the job was enqueued.
    Gone(Reference),
}

/// Encodes references for the wire and decodes them through an
/// [`EntityResolver`].
#[derive(Clone)]
pub struct Codec {
    resolver: Arc<dyn EntityResolver>,
}

impl Codec {
    /// Create a codec over `resolver`.
    pub fn new(resolver: Arc<dyn EntityResolver>) -> Self {
        Self { resolver }
    }

    /// Encode a reference. See [`Reference::encode`].
    pub fn encode(reference: &Reference) -> JobResult<Value> {
        reference.encode()
    }

    /// Decode one wire value.
    pub async fn decode(&self, wire: &Value) -> JobResult<Decoded> {
        let decoded = match Reference::parse(wire) {
            Reference::Class(name) => Decoded::Found(Resolved::Class(name)),
            Reference::Value(value) => Decoded::Found(Resolved::Value(value)),
            Reference::Entity { kind, id } => match self.resolver.resolve(&kind, &id).await? {
                Some(entity) => Decoded::Found(Resolved::Entity(entity)),
                None => Decoded::Gone(Reference::Entity { kind, id }),
            },
        };
        Ok(decoded)
    }

    /// Decode a list, stopping at the first missing entity.
    pub async fn decode_all(&self, wire: &[Value]) -> JobResult<Result<Vec<Resolved>, Reference>> {
        let mut resolved = Vec::with_capacity(wire.len());
        for value in wire {
            match self.decode(value).await? {
                Decoded::Found(value) => resolved.push(value),
                Decoded::Gone(reference) => return Ok(Err(reference)),
            }
        }
        Ok(Ok(resolved))
    }
}

/// In-process entity resolver.
#[derive(Default)]
pub struct MemoryResolver {
    entities: RwLock<HashMap<(String, String), Arc<dyn Entity>>>,
}

impl MemoryResolver {
    /// Empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entity.
    pub fn insert(&self, entity: Arc<dyn Entity>) {
        let key = (entity.kind().to_string(), entity.id());
        self.entities.write().insert(key, entity);
    }

    /// Remove an entity. Returns whether it existed.
    pub fn remove(&self, kind: &str, id: &str) -> bool {
        self.entities
            .write()
            .remove(&(kind.to_string(), id.to_string()))
            .is_some()
    }

    /// Look up without going through the async trait.
    pub fn get(&self, kind: &str, id: &str) -> Option<Arc<dyn Entity>> {
        self.entities
            .read()
            .get(&(kind.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl EntityResolver for MemoryResolver {
    async fn resolve(&self, kind: &str, id: &str) -> JobResult<Option<Arc<dyn Entity>>> {
        Ok(self.get(kind, id))
    }
}
