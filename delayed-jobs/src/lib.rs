//! Deferred method execution over a job queue.
//!
//! A call such as "run `Report.generate(2024)` later" is encoded into a
//! flat JSON envelope, pushed onto a queue backend, and invoked by a worker
//! through a registry of receivers. On top of plain deferral it provides:
//! - 🔁 Unique jobs: only the most recent enqueue of an identical call runs
//! - 🚦 Throttling of identical scheduled calls
//! - ⏰ Scheduling at a time or after a delay
//! - 🏷️ Tracking tags for outstanding work
//! - 📝 Metadata documents keyed by call
//! - 🗑️ Graceful skipping when a referenced entity was deleted
//!
//! ## Envelopes
//!
//! ```
//! use delayed_jobs::{Envelope, Reference};
//!
//! let envelope = Envelope::build(
//!     &Reference::entity("Invoice", 42),
//!     "deliver",
//!     &[Reference::value("reminder")],
//! ).unwrap();
//!
//! assert_eq!(
//!     envelope.to_payload().unwrap(),
//!     r#"{"args":["reminder"],"method":"deliver","obj":"ENTITY:Invoice:42"}"#
//! );
//! ```
//!
//! ## Complete Example
//!
//! ```
//! use delayed_jobs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), JobError> {
//!     let receivers = Arc::new(ReceiverRegistry::new());
//!     receivers.register(FnReceiver::new("Report").method("generate", |_target, args| async move {
//!         println!("generating {:?}", args[0].as_i64());
//!         Ok(())
//!     }));
//!
//!     let backend = Arc::new(MemoryBackend::new());
//!     let store = Arc::new(MemoryStore::new());
//!     let config = DelayConfig::default();
//!
//!     let dispatcher = Dispatcher::new(backend.clone(), store.clone(), receivers.clone(), config.clone());
//!     dispatcher
//!         .delay(Reference::class("Report"))
//!         .unique()
//!         .call("generate", &[Reference::value(2024)])
//!         .await?;
//!
//!     let executor = Executor::new(Arc::new(MemoryResolver::new()), store, receivers, &config);
//!     let worker = Worker::new(backend, Arc::new(executor), ["default"]);
//!     assert_eq!(worker.work_once().await?, Some(Outcome::Performed));
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod execute;
pub mod memory;
pub mod meta;
pub mod receiver;
pub mod redis_store;
pub mod reference;
pub mod tracking;
pub mod traits;
pub mod worker;

pub use codec::{Codec, Decoded, EntityResolver, MemoryResolver};
pub use config::{DelayConfig, DelayConfigBuilder, UniqueScope};
pub use dedup::{DedupKey, DedupRegistry, new_instance_id};
pub use dispatch::{Delay, DelayOptions, Dispatched, Dispatcher, Schedule};
pub use envelope::Envelope;
pub use error::{BoxError, JobError, JobResult};
pub use execute::{Executor, Outcome};
pub use memory::{MemoryBackend, MemoryStore};
pub use meta::MetaStore;
pub use receiver::{FnReceiver, MethodHandler, Receiver, ReceiverRegistry};
pub use redis_store::{RedisBackend, RedisStore};
pub use reference::{Entity, Reference, Resolved};
pub use tracking::TrackingStore;
pub use traits::{QueueBackend, StateStore};
pub use worker::{Worker, WorkerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::{EntityResolver, MemoryResolver};
    pub use crate::config::{DelayConfig, UniqueScope};
    pub use crate::dispatch::{DelayOptions, Dispatched, Dispatcher, Schedule};
    pub use crate::envelope::Envelope;
    pub use crate::error::{BoxError, JobError, JobResult};
    pub use crate::execute::{Executor, Outcome};
    pub use crate::memory::{MemoryBackend, MemoryStore};
    pub use crate::meta::MetaStore;
    pub use crate::receiver::{FnReceiver, Receiver, ReceiverRegistry};
    pub use crate::redis_store::{RedisBackend, RedisStore};
    pub use crate::reference::{Entity, Reference, Resolved};
    pub use crate::tracking::TrackingStore;
    pub use crate::traits::{QueueBackend, StateStore};
    pub use crate::worker::{Worker, WorkerConfig};
}
