//! The consumer side: running a dequeued envelope.

use crate::codec::{Codec, Decoded, EntityResolver};
use crate::config::DelayConfig;
use crate::dedup::DedupRegistry;
use crate::envelope::Envelope;
use crate::error::{JobError, JobResult};
use crate::receiver::ReceiverRegistry;
use crate::reference::Reference;
use crate::traits::StateStore;
use delayed_log::{debug, info, warn};
use std::sync::Arc;

/// How a successful execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The method ran.
    Performed,
    /// A newer instance of this unique job was enqueued; nothing ran.
    StaleDuplicate,
    /// The referenced entity no longer exists; nothing ran.
    EntityGone(Reference),
}

/// Decodes envelopes and invokes their receivers.
#[derive(Clone)]
pub struct Executor {
    codec: Codec,
    receivers: Arc<ReceiverRegistry>,
    dedup: DedupRegistry,
}

impl Executor {
    /// Executor resolving entities through `resolver` and reading the dedup
    /// registry from `store`.
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        store: Arc<dyn StateStore>,
        receivers: Arc<ReceiverRegistry>,
        config: &DelayConfig,
    ) -> Self {
        Self {
            codec: Codec::new(resolver),
            receivers,
            dedup: DedupRegistry::new(store, config),
        }
    }

    /// Run `envelope`, taken from `queue`.
    ///
    /// Errors from the invoked method come back as [`JobError::Perform`].
    pub async fn execute(&self, queue: &str, envelope: &Envelope) -> JobResult<Outcome> {
        let target = envelope.target_reference();
        let receiver = self
            .receivers
            .check(&target, &envelope.method)
            .map_err(|e| JobError::InvalidEnvelope(e.to_string()))?;

        if envelope.is_unique() {
            let last = self.dedup.last_instance_id(queue, envelope).await?;
            if last != envelope.job_instance_id {
                info!(
                    "Skipping {} ({}): superseded by a newer unique enqueue",
                    envelope.display_name(),
                    envelope.job_instance_id.as_deref().unwrap_or_default()
                );
                return Ok(Outcome::StaleDuplicate);
            }
            self.dedup.untrack(queue, envelope).await?;
        }

        let args = match self.codec.decode_all(&envelope.args).await? {
            Ok(args) => args,
            Err(gone) => return Ok(self.entity_gone(envelope, gone)),
        };
        let target = match self.codec.decode(&envelope.target).await? {
            Decoded::Found(target) => target,
            Decoded::Gone(gone) => return Ok(self.entity_gone(envelope, gone)),
        };

        debug!("Performing {} from {}", envelope.display_name(), queue);
        receiver
            .perform(&target, &envelope.method, &args)
            .await
            .map_err(JobError::Perform)?;
        Ok(Outcome::Performed)
    }

    /// Parse `payload` and run it.
    pub async fn execute_payload(&self, queue: &str, payload: &str) -> JobResult<Outcome> {
        let envelope = Envelope::from_payload(payload)?;
        self.execute(queue, &envelope).await
    }

    fn entity_gone(&self, envelope: &Envelope, gone: Reference) -> Outcome {
        warn!(
            "Skipping {}: {} no longer exists",
            envelope.display_name(),
            gone
        );
        Outcome::EntityGone(gone)
    }
}
