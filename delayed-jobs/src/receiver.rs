//! Receivers: the closed set of types whose methods can be deferred.

use crate::error::{BoxError, JobError, JobResult};
use crate::reference::{Reference, Resolved};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A type that answers a fixed set of deferred method calls.
///
/// The name is the class name for class targets, the entity kind for
/// entity targets, or a JSON type name (`String`, `Number`, ...) for plain
/// values.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Lookup name.
    fn name(&self) -> &str;

    /// Whether `method` can be invoked.
    fn responds_to(&self, method: &str) -> bool;

    /// Queue jobs go to when the caller does not pick one.
    fn queue(&self) -> Option<&str> {
        None
    }

    /// Run `method` on `target`.
    async fn perform(&self, target: &Resolved, method: &str, args: &[Resolved])
    -> Result<(), BoxError>;
}

/// Boxed method body for [`FnReceiver`].
pub type MethodHandler = Arc<
    dyn Fn(Resolved, Vec<Resolved>) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>
        + Send
        + Sync,
>;

/// Receiver assembled from closures, one per method.
///
/// ```
/// use delayed_jobs::{FnReceiver, Receiver};
///
/// let receiver = FnReceiver::new("Billing")
///     .with_queue("billing")
///     .method("charge", |_target, args| async move {
///         println!("charging {:?}", args);
///         Ok(())
///     });
///
/// assert!(receiver.responds_to("charge"));
/// assert_eq!(receiver.queue(), Some("billing"));
/// ```
pub struct FnReceiver {
    name: String,
    queue: Option<String>,
    methods: HashMap<String, MethodHandler>,
}

impl FnReceiver {
    /// Receiver with no methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            methods: HashMap::new(),
        }
    }

    /// Set the default queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Add a method.
    pub fn method<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Resolved, Vec<Resolved>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let wrapped: MethodHandler = Arc::new(
            move |target: Resolved,
                  args: Vec<Resolved>|
                  -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> {
                Box::pin(handler(target, args))
            },
        );
        self.methods.insert(method.into(), wrapped);
        self
    }
}

#[async_trait]
impl Receiver for FnReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn responds_to(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    async fn perform(
        &self,
        target: &Resolved,
        method: &str,
        args: &[Resolved],
    ) -> Result<(), BoxError> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| format!("undefined method `{}` for {}", method, self.name))?;
        handler(target.clone(), args.to_vec()).await
    }
}

/// Receivers by name.
#[derive(Default)]
pub struct ReceiverRegistry {
    receivers: RwLock<HashMap<String, Arc<dyn Receiver>>>,
}

impl ReceiverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a receiver under its name.
    pub fn register(&self, receiver: impl Receiver + 'static) {
        self.register_arc(Arc::new(receiver));
    }

    /// Add or replace a shared receiver.
    pub fn register_arc(&self, receiver: Arc<dyn Receiver>) {
        let name = receiver.name().to_string();
        self.receivers.write().insert(name, receiver);
    }

    /// Receiver registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Receiver>> {
        self.receivers.read().get(name).cloned()
    }

    /// Whether the receiver for `target` answers `method`.
    pub fn responds_to(&self, target: &Reference, method: &str) -> bool {
        self.get(target.receiver_name())
            .is_some_and(|receiver| receiver.responds_to(method))
    }

    /// Receiver for `target`, provided it answers `method`.
    pub fn check(&self, target: &Reference, method: &str) -> JobResult<Arc<dyn Receiver>> {
        let name = target.receiver_name();
        let receiver = self
            .get(name)
            .ok_or_else(|| JobError::UnknownReceiver(name.to_string()))?;

        if !receiver.responds_to(method) {
            return Err(JobError::UnknownMethod {
                receiver: name.to_string(),
                method: method.to_string(),
            });
        }
        Ok(receiver)
    }

    /// Registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.receivers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
