//! Integration tests for common delayed workflows.
//!
//! These tests wire a dispatcher, executor and worker together over the
//! in-memory backends and verify the most common use cases end to end.

use delayed::prelude::*;
use delayed::{DedupKey, Decoded, Codec};
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Domain fixtures
// =============================================================================

#[derive(Debug)]
struct User {
    id: u32,
    email: String,
}

impl Entity for User {
    fn kind(&self) -> &str {
        "User"
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Resolver over a fixed table, standing in for a database.
#[derive(Default)]
struct UserTable {
    rows: Mutex<HashMap<String, Arc<User>>>,
}

impl UserTable {
    fn insert(&self, user: User) {
        self.rows.lock().insert(user.id.to_string(), Arc::new(user));
    }

    fn delete(&self, id: u32) {
        self.rows.lock().remove(&id.to_string());
    }
}

#[async_trait]
impl EntityResolver for UserTable {
    async fn resolve(&self, kind: &str, id: &str) -> JobResult<Option<Arc<dyn Entity>>> {
        if kind != "User" {
            return Ok(None);
        }
        Ok(self
            .rows
            .lock()
            .get(id)
            .cloned()
            .map(|user| user as Arc<dyn Entity>))
    }
}

/// Hand-written receiver with a default queue.
struct Mailer {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Receiver for Mailer {
    fn name(&self) -> &str {
        "User"
    }

    fn responds_to(&self, method: &str) -> bool {
        matches!(method, "send_welcome" | "send_digest")
    }

    fn queue(&self) -> Option<&str> {
        Some("mailers")
    }

    async fn perform(
        &self,
        target: &Resolved,
        method: &str,
        args: &[Resolved],
    ) -> Result<(), BoxError> {
        let user = target.entity::<User>().ok_or("target is not a user")?;
        let extra = args.first().and_then(Resolved::as_str).unwrap_or("");
        self.sent
            .lock()
            .push(format!("{} -> {} {}", method, user.email, extra).trim_end().to_string());
        Ok(())
    }
}

struct Stack {
    backend: Arc<MemoryBackend>,
    users: Arc<UserTable>,
    mailer: Arc<Mailer>,
    dispatcher: Dispatcher,
    worker: Worker,
}

fn stack() -> Stack {
    let mailer = Arc::new(Mailer {
        sent: Mutex::new(Vec::new()),
    });
    let receivers = Arc::new(ReceiverRegistry::new());
    receivers.register_arc(mailer.clone());

    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemoryStore::new());
    let users = Arc::new(UserTable::default());
    let config = DelayConfig::default();

    let dispatcher = Dispatcher::new(
        backend.clone(),
        store.clone(),
        receivers.clone(),
        config.clone(),
    );
    let executor = Executor::new(users.clone(), store, receivers, &config);
    let worker = Worker::with_config(
        backend.clone(),
        Arc::new(executor),
        ["mailers", "default"],
        WorkerConfig {
            log_execution: false,
            ..WorkerConfig::default()
        },
    );

    Stack {
        backend,
        users,
        mailer,
        dispatcher,
        worker,
    }
}

async fn run_all(worker: &Worker) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = worker.work_once().await.unwrap() {
        outcomes.push(outcome);
    }
    outcomes
}

fn alice() -> User {
    User {
        id: 1,
        email: "alice@example.com".into(),
    }
}

// =============================================================================
// Workflows
// =============================================================================

#[tokio::test]
async fn test_welcome_mail_goes_to_receiver_queue() {
    let stack = stack();
    stack.users.insert(alice());

    let dispatched = stack
        .dispatcher
        .delay(Reference::entity("User", 1))
        .call("send_welcome", &[])
        .await
        .unwrap();

    assert_eq!(dispatched.queue(), "mailers");
    assert_eq!(run_all(&stack.worker).await, vec![Outcome::Performed]);
    assert_eq!(
        *stack.mailer.sent.lock(),
        vec!["send_welcome -> alice@example.com".to_string()]
    );
}

#[tokio::test]
async fn test_repeated_digest_collapses_to_latest() {
    let stack = stack();
    stack.users.insert(alice());

    for edition in ["monday", "tuesday", "tuesday"] {
        stack
            .dispatcher
            .delay(Reference::entity("User", 1))
            .unique()
            .call("send_digest", &[Reference::value(edition)])
            .await
            .unwrap();
    }

    let outcomes = run_all(&stack.worker).await;
    assert_eq!(
        outcomes,
        vec![
            Outcome::Performed,
            Outcome::StaleDuplicate,
            Outcome::Performed
        ]
    );
    assert_eq!(
        *stack.mailer.sent.lock(),
        vec![
            "send_digest -> alice@example.com monday".to_string(),
            "send_digest -> alice@example.com tuesday".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_scheduled_mail_runs_once_due() {
    let stack = stack();
    stack.users.insert(alice());

    stack
        .dispatcher
        .delay(Reference::entity("User", 1))
        .at(chrono::Utc::now() - chrono::Duration::seconds(1))
        .throttle()
        .call("send_welcome", &[])
        .await
        .unwrap();
    stack
        .dispatcher
        .delay(Reference::entity("User", 1))
        .after(chrono::Duration::hours(1))
        .call("send_digest", &[])
        .await
        .unwrap();

    assert_eq!(stack.backend.schedule_size(), 2);
    assert_eq!(run_all(&stack.worker).await, vec![Outcome::Performed]);
    assert_eq!(stack.backend.schedule_size(), 1);
    assert_eq!(stack.backend.scheduled("mailers")[0].1.method, "send_digest");
}

#[tokio::test]
async fn test_deleted_user_is_skipped() {
    let stack = stack();
    stack.users.insert(alice());

    stack
        .dispatcher
        .delay(Reference::entity("User", 1))
        .call("send_welcome", &[])
        .await
        .unwrap();
    stack.users.delete(1);

    assert_eq!(
        run_all(&stack.worker).await,
        vec![Outcome::EntityGone(Reference::entity("User", 1))]
    );
    assert!(stack.mailer.sent.lock().is_empty());
}

#[tokio::test]
async fn test_unknown_method_is_rejected_at_dispatch() {
    let stack = stack();
    let result = stack
        .dispatcher
        .delay(Reference::entity("User", 1))
        .call("send_invoice", &[])
        .await;

    assert!(matches!(result, Err(JobError::UnknownMethod { .. })));
    assert_eq!(stack.backend.queue_size("mailers"), 0);
}

// =============================================================================
// Wire format
// =============================================================================

#[test]
fn test_envelope_wire_format() {
    let mut envelope = Envelope::build(
        &Reference::class("Reports::Nightly"),
        "generate",
        &[Reference::value(2024), Reference::entity("User", 1)],
    )
    .unwrap()
    .with_tracking_tag("nightly");
    envelope.job_instance_id = Some("default_1".into());

    assert_eq!(
        envelope.to_canonical_value().unwrap(),
        json!({
            "obj": "CLASS:Reports::Nightly",
            "method": "generate",
            "args": [2024, "ENTITY:User:1"],
            "job_id": "default_1",
            "tracked": "nightly"
        })
    );
}

#[test]
fn test_dedup_key_is_hex_sha256() {
    let envelope = Envelope::build(&Reference::class("Report"), "run", &[]).unwrap();
    let key = DedupKey::compute(&envelope, None).unwrap();
    assert_eq!(key.as_str().len(), 64);
    assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_codec_round_trip_through_custom_resolver() {
    let users = Arc::new(UserTable::default());
    users.insert(alice());
    let codec = Codec::new(users);

    for reference in [
        Reference::value(42),
        Reference::class("Report"),
        Reference::entity("User", 1),
    ] {
        let wire = Codec::encode(&reference).unwrap();
        match codec.decode(&wire).await.unwrap() {
            Decoded::Found(resolved) => assert_eq!(resolved.reference(), reference),
            Decoded::Gone(gone) => panic!("unexpected gone: {}", gone),
        }
    }
}

#[test]
fn test_config_from_toml() {
    let config = DelayConfig::from_toml_str(
        r#"
        default_queue = "jobs"
        key_prefix = "app"
        "#,
    )
    .unwrap();

    assert_eq!(config.default_queue, "jobs");
    assert_eq!(config.key("queue:jobs"), "app:queue:jobs");
    assert_eq!(config.unique_scope, UniqueScope::Queue);
}
