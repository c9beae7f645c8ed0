//! The producer side: turning a method call into an enqueued envelope.

use crate::config::DelayConfig;
use crate::dedup::{DedupRegistry, new_instance_id};
use crate::envelope::Envelope;
use crate::error::JobResult;
use crate::receiver::ReceiverRegistry;
use crate::reference::Reference;
use crate::traits::{QueueBackend, StateStore};
use crate::tracking::TrackingStore;
use chrono::{DateTime, Duration, Utc};
use delayed_log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// When a scheduled job becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At a point in time.
    At(DateTime<Utc>),
    /// After a delay from the enqueue call.
    In(Duration),
}

/// Options for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DelayOptions {
    /// Destination queue.
    pub queue: Option<String>,
    /// Delayed schedule, if any.
    pub schedule: Option<Schedule>,
    /// Keep only the most recent enqueue of identical calls.
    pub unique: bool,
    /// Skip the enqueue if an identical call is already scheduled.
    pub throttle: bool,
    /// Tag to record in the tracking set and on the envelope.
    pub tracked: Option<String>,
    /// Extra top-level envelope fields.
    pub params: BTreeMap<String, Value>,
}

impl DelayOptions {
    /// No options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Run at `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Some(Schedule::At(at));
        self
    }

    /// Run after `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.schedule = Some(Schedule::In(delay));
        self
    }

    /// Dedup by call identity.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Suppress identical scheduled calls.
    pub fn throttle(mut self) -> Self {
        self.throttle = true;
        self
    }

    /// Tag the job.
    pub fn tracked(mut self, tag: impl Into<String>) -> Self {
        self.tracked = Some(tag.into());
        self
    }

    /// Add an extra envelope field.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Pushed for immediate processing.
    Enqueued {
        /// Queue name.
        queue: String,
        /// Envelope as sent.
        envelope: Envelope,
    },
    /// Handed to the delayed schedule.
    Scheduled {
        /// Queue name.
        queue: String,
        /// Requested schedule.
        schedule: Schedule,
        /// Envelope as sent.
        envelope: Envelope,
    },
    /// An identical call was already scheduled; nothing was written.
    Throttled {
        /// Queue name.
        queue: String,
    },
}

impl Dispatched {
    /// Resolved queue.
    pub fn queue(&self) -> &str {
        match self {
            Self::Enqueued { queue, .. }
            | Self::Scheduled { queue, .. }
            | Self::Throttled { queue } => queue,
        }
    }

    /// Envelope handed to the backend.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Enqueued { envelope, .. } | Self::Scheduled { envelope, .. } => Some(envelope),
            Self::Throttled { .. } => None,
        }
    }

    /// Whether the call was suppressed.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// Builds envelopes and hands them to the queue backend.
///
/// Side effects of one dispatch happen in this order: instance id stamp,
/// dedup registry write, tracking tag add, backend call. Nothing is written
/// when the receiver does not answer the method.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn QueueBackend>,
    receivers: Arc<ReceiverRegistry>,
    dedup: DedupRegistry,
    tracking: TrackingStore,
    config: DelayConfig,
}

impl Dispatcher {
    /// Dispatcher writing jobs to `backend` and dedup/tracking state to `store`.
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        store: Arc<dyn StateStore>,
        receivers: Arc<ReceiverRegistry>,
        config: DelayConfig,
    ) -> Self {
        Self {
            backend,
            receivers,
            dedup: DedupRegistry::new(store.clone(), &config),
            tracking: TrackingStore::new(store, &config),
            config,
        }
    }

    /// The dedup registry.
    pub fn dedup(&self) -> &DedupRegistry {
        &self.dedup
    }

    /// The tracking store.
    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    /// Start a deferred call on `target`.
    ///
    /// ```no_run
    /// # use delayed_jobs::{Dispatcher, JobResult, Reference};
    /// # async fn example(dispatcher: &Dispatcher) -> JobResult<()> {
    /// dispatcher
    ///     .delay(Reference::entity("Invoice", 42))
    ///     .queue("mailers")
    ///     .unique()
    ///     .call("send_reminder", &[Reference::value("second notice")])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn delay(&self, target: Reference) -> Delay<'_> {
        Delay {
            dispatcher: self,
            target,
            options: DelayOptions::default(),
        }
    }

    /// Queue a call of `method` on `target`.
    pub async fn dispatch(
        &self,
        target: &Reference,
        method: &str,
        args: &[Reference],
        options: DelayOptions,
    ) -> JobResult<Dispatched> {
        let receiver = self.receivers.check(target, method)?;

        let queue = options
            .queue
            .or_else(|| receiver.queue().map(str::to_string))
            .unwrap_or_else(|| self.config.default_queue.clone());

        let tracked = options.tracked.filter(|tag| !tag.is_empty());

        let mut envelope = Envelope::build(target, method, args)?.with_params(options.params)?;
        if let Some(tag) = &tracked {
            envelope = envelope.with_tracking_tag(tag.clone());
        }

        if options.unique {
            envelope.job_instance_id = Some(new_instance_id(&queue));
            self.dedup.track(&queue, &envelope).await?;
        } else if options.throttle {
            if options.schedule.is_some() {
                if self.backend.delayed_job_exists(&queue, &envelope).await? {
                    info!(
                        "Throttled {} on {}: already scheduled",
                        envelope.display_name(),
                        queue
                    );
                    return Ok(Dispatched::Throttled { queue });
                }
            } else {
                warn!(
                    "Throttle has no effect without at/after; enqueueing {} on {}",
                    envelope.display_name(),
                    queue
                );
            }
        } else if options.schedule.is_none() {
            envelope.stamp_enqueued_at();
        }

        if let Some(tag) = &tracked {
            self.tracking.track(tag).await?;
        }

        match options.schedule {
            None => {
                self.backend.enqueue(&queue, &envelope).await?;
                debug!("Enqueued {} on {}", envelope.display_name(), queue);
                Ok(Dispatched::Enqueued { queue, envelope })
            }
            Some(schedule) => {
                match schedule {
                    Schedule::At(at) => self.backend.enqueue_at(&queue, at, &envelope).await?,
                    Schedule::In(delay) => {
                        self.backend.enqueue_in(&queue, delay, &envelope).await?
                    }
                }
                debug!(
                    "Scheduled {} on {} ({:?})",
                    envelope.display_name(),
                    queue,
                    schedule
                );
                Ok(Dispatched::Scheduled {
                    queue,
                    schedule,
                    envelope,
                })
            }
        }
    }
}

/// Pending deferred call, finished by [`Delay::call`].
#[must_use = "a Delay does nothing until `call` is awaited"]
pub struct Delay<'a> {
    dispatcher: &'a Dispatcher,
    target: Reference,
    options: DelayOptions,
}

impl Delay<'_> {
    /// Replace all options.
    pub fn options(mut self, options: DelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.options = self.options.queue(queue);
        self
    }

    /// Run at `at`.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.options = self.options.at(at);
        self
    }

    /// Run after `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.options = self.options.after(delay);
        self
    }

    /// Dedup by call identity.
    pub fn unique(mut self) -> Self {
        self.options = self.options.unique();
        self
    }

    /// Suppress identical scheduled calls.
    pub fn throttle(mut self) -> Self {
        self.options = self.options.throttle();
        self
    }

    /// Tag the job.
    pub fn tracked(mut self, tag: impl Into<String>) -> Self {
        self.options = self.options.tracked(tag);
        self
    }

    /// Add an extra envelope field.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options = self.options.param(key, value);
        self
    }

    /// Dispatch `method` with `args`.
    pub async fn call(self, method: &str, args: &[Reference]) -> JobResult<Dispatched> {
        self.dispatcher
            .dispatch(&self.target, method, args, self.options)
            .await
    }
}
