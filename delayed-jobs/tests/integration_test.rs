//! Integration tests for delayed-jobs

use chrono::{Duration, Utc};
use delayed_jobs::*;
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug)]
struct Article {
    id: u64,
    title: Mutex<String>,
}

impl Entity for Article {
    fn kind(&self) -> &str {
        "Article"
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct App {
    backend: Arc<MemoryBackend>,
    store: Arc<MemoryStore>,
    resolver: Arc<MemoryResolver>,
    dispatcher: Dispatcher,
    executor: Executor,
    calls: Arc<Mutex<Vec<String>>>,
}

impl App {
    fn new(config: DelayConfig) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let receivers = Arc::new(ReceiverRegistry::new());

        let log = calls.clone();
        receivers.register(FnReceiver::new("Dummy").method("run", move |_, args| {
            let log = log.clone();
            async move {
                log.lock().push(format!("run {}", args[0].as_i64().unwrap_or_default()));
                Ok(())
            }
        }));

        let log = calls.clone();
        receivers.register(FnReceiver::new("Article").method("retitle", move |target, args| {
            let log = log.clone();
            async move {
                let article = target.entity::<Article>().ok_or("expected an article")?;
                let title = args[0].as_str().ok_or("expected a title")?.to_string();
                *article.title.lock() = title.clone();
                log.lock().push(format!("retitle {}", title));
                Ok::<(), BoxError>(())
            }
        }));

        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(MemoryResolver::new());
        let dispatcher = Dispatcher::new(
            backend.clone(),
            store.clone(),
            receivers.clone(),
            config.clone(),
        );
        let executor = Executor::new(resolver.clone(), store.clone(), receivers, &config);

        Self {
            backend,
            store,
            resolver,
            dispatcher,
            executor,
            calls,
        }
    }

    async fn drain(&self, queue: &str) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(envelope) = self.backend.dequeue(queue).await.unwrap() {
            outcomes.push(self.executor.execute(queue, &envelope).await.unwrap());
        }
        outcomes
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn dummy() -> Reference {
    Reference::class("Dummy")
}

#[tokio::test]
async fn test_plain_enqueues_are_distinct() {
    let app = App::new(DelayConfig::default());
    for _ in 0..2 {
        app.dispatcher
            .delay(dummy())
            .call("run", &[Reference::value(123)])
            .await
            .unwrap();
    }

    let queued = app.backend.queued("default");
    assert_eq!(queued.len(), 2);
    assert_ne!(queued[0].enqueued_at, queued[1].enqueued_at);
    assert_ne!(queued[0].to_payload().unwrap(), queued[1].to_payload().unwrap());

    assert_eq!(app.drain("default").await, vec![Outcome::Performed; 2]);
    assert_eq!(app.calls(), vec!["run 123", "run 123"]);
}

#[tokio::test]
async fn test_unique_runs_only_latest() {
    let app = App::new(DelayConfig::default());
    let mut ids = Vec::new();
    for _ in 0..2 {
        let dispatched = app
            .dispatcher
            .delay(dummy())
            .unique()
            .call("run", &[Reference::value(123)])
            .await
            .unwrap();
        ids.push(dispatched.envelope().unwrap().job_instance_id.clone().unwrap());
    }
    assert_ne!(ids[0], ids[1]);

    let queued = app.backend.queued("default");
    let last = app
        .dispatcher
        .dedup()
        .last_instance_id("default", &queued[0])
        .await
        .unwrap();
    assert_eq!(last.as_ref(), Some(&ids[1]));

    assert_eq!(
        app.drain("default").await,
        vec![Outcome::StaleDuplicate, Outcome::Performed]
    );
    assert_eq!(app.calls(), vec!["run 123"]);
    assert_eq!(app.store.hash_len("unique_jobs"), 0);
}

#[tokio::test]
async fn test_unique_different_args_both_run() {
    let app = App::new(DelayConfig::default());
    for n in [1, 2] {
        app.dispatcher
            .delay(dummy())
            .unique()
            .call("run", &[Reference::value(n)])
            .await
            .unwrap();
    }

    assert_eq!(app.drain("default").await, vec![Outcome::Performed; 2]);
    assert_eq!(app.calls(), vec!["run 1", "run 2"]);
}

#[tokio::test]
async fn test_throttle_keeps_one_scheduled() {
    let app = App::new(DelayConfig::default());
    let first = app
        .dispatcher
        .delay(dummy())
        .at(Utc::now() + Duration::minutes(5))
        .throttle()
        .call("run", &[Reference::value(1)])
        .await
        .unwrap();
    let second = app
        .dispatcher
        .delay(dummy())
        .at(Utc::now() + Duration::minutes(10))
        .throttle()
        .call("run", &[Reference::value(1)])
        .await
        .unwrap();

    assert!(matches!(first, Dispatched::Scheduled { .. }));
    assert_eq!(second, Dispatched::Throttled { queue: "default".into() });
    assert_eq!(app.backend.schedule_size(), 1);
}

#[tokio::test]
async fn test_throttle_is_per_queue() {
    let app = App::new(DelayConfig::default());
    for queue in ["default", "low"] {
        let dispatched = app
            .dispatcher
            .delay(dummy())
            .queue(queue)
            .after(Duration::minutes(5))
            .throttle()
            .call("run", &[])
            .await
            .unwrap();
        assert!(!dispatched.is_throttled());
    }
    assert_eq!(app.backend.schedule_size(), 2);
}

#[tokio::test]
async fn test_deleted_entity_is_skipped() {
    let app = App::new(DelayConfig::default());
    let article = Arc::new(Article {
        id: 12345,
        title: Mutex::new("Draft".into()),
    });
    app.resolver.insert(article.clone());

    app.dispatcher
        .delay(Reference::of(article.as_ref()))
        .call("retitle", &[Reference::value("Final")])
        .await
        .unwrap();
    assert!(app.resolver.remove("Article", "12345"));

    let outcomes = app.drain("default").await;
    assert_eq!(outcomes, vec![Outcome::EntityGone(Reference::entity("Article", 12345))]);
    assert!(app.calls().is_empty());
    assert_eq!(*article.title.lock(), "Draft");
}

#[tokio::test]
async fn test_live_entity_is_mutated() {
    let app = App::new(DelayConfig::default());
    let article = Arc::new(Article {
        id: 7,
        title: Mutex::new("Draft".into()),
    });
    app.resolver.insert(article.clone());

    app.dispatcher
        .delay(Reference::of(article.as_ref()))
        .call("retitle", &[Reference::value("Final")])
        .await
        .unwrap();

    assert_eq!(app.drain("default").await, vec![Outcome::Performed]);
    assert_eq!(*article.title.lock(), "Final");
}

#[tokio::test]
async fn test_unknown_method_fails_before_enqueue() {
    let app = App::new(DelayConfig::default());
    let err = app
        .dispatcher
        .delay(dummy())
        .unique()
        .call("walk", &[])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "undefined method `walk` for Dummy");
    assert_eq!(app.backend.queue_size("default"), 0);
    assert_eq!(app.store.hash_len("unique_jobs"), 0);
}

#[tokio::test]
async fn test_unique_scope_queue_keeps_queues_apart() {
    let app = App::new(DelayConfig::default());
    for queue in ["default", "low"] {
        app.dispatcher
            .delay(dummy())
            .queue(queue)
            .unique()
            .call("run", &[Reference::value(5)])
            .await
            .unwrap();
    }

    assert_eq!(app.drain("default").await, vec![Outcome::Performed]);
    assert_eq!(app.drain("low").await, vec![Outcome::Performed]);
}

#[tokio::test]
async fn test_unique_scope_global_collides_across_queues() {
    let config = DelayConfig::builder()
        .unique_scope(UniqueScope::Global)
        .build()
        .unwrap();
    let app = App::new(config);
    for queue in ["default", "low"] {
        app.dispatcher
            .delay(dummy())
            .queue(queue)
            .unique()
            .call("run", &[Reference::value(5)])
            .await
            .unwrap();
    }

    assert_eq!(app.drain("default").await, vec![Outcome::StaleDuplicate]);
    assert_eq!(app.drain("low").await, vec![Outcome::Performed]);
}

#[tokio::test]
async fn test_tracking_survives_execution() {
    let app = App::new(DelayConfig::default());
    app.dispatcher
        .delay(dummy())
        .tracked("import-42")
        .call("run", &[Reference::value(1)])
        .await
        .unwrap();

    let queued = app.backend.queued("default");
    assert_eq!(queued[0].tracking_tag.as_deref(), Some("import-42"));

    app.drain("default").await;
    let tracking = app.dispatcher.tracking();
    assert!(tracking.is_tracked("import-42").await.unwrap());

    tracking.untrack("import-42").await.unwrap();
    assert!(!tracking.is_tracked("import-42").await.unwrap());
}

#[tokio::test]
async fn test_params_reach_the_wire() {
    let app = App::new(DelayConfig::default());
    app.dispatcher
        .delay(dummy())
        .param("request_id", "abc")
        .call("run", &[Reference::value(1)])
        .await
        .unwrap();

    let envelope = &app.backend.queued("default")[0];
    let wire = envelope.to_canonical_value().unwrap();
    assert_eq!(wire["request_id"], json!("abc"));
    assert_eq!(wire["obj"], json!("CLASS:Dummy"));
}

#[tokio::test]
async fn test_meta_data_visible_to_running_job() {
    let store = Arc::new(MemoryStore::new());
    let meta = MetaStore::new(store.clone());
    let seen = Arc::new(Mutex::new(None));

    let receivers = Arc::new(ReceiverRegistry::new());
    let (job_meta, job_seen) = (meta.clone(), seen.clone());
    receivers.register(FnReceiver::new("Import").method("run", move |_, args| {
        let (meta, seen) = (job_meta.clone(), job_seen.clone());
        let call: Vec<Reference> = args.iter().map(Resolved::reference).collect();
        async move {
            let doc: Option<serde_json::Value> = meta.load("Import", &call).await?;
            *seen.lock() = doc;
            Ok::<(), BoxError>(())
        }
    }));

    let config = DelayConfig::default();
    let backend = Arc::new(MemoryBackend::new());
    let dispatcher = Dispatcher::new(
        backend.clone(),
        store.clone(),
        receivers.clone(),
        config.clone(),
    );
    let executor = Executor::new(
        Arc::new(MemoryResolver::new()),
        store.clone(),
        receivers,
        &config,
    );

    let args = [Reference::value("uploads/7.csv")];
    meta.store("Import", &args, &json!({"rows": 120})).await.unwrap();
    dispatcher
        .delay(Reference::class("Import"))
        .call("run", &args)
        .await
        .unwrap();

    let envelope = backend.dequeue("default").await.unwrap().unwrap();
    assert_eq!(
        executor.execute("default", &envelope).await.unwrap(),
        Outcome::Performed
    );
    assert_eq!(*seen.lock(), Some(json!({"rows": 120})));

    assert!(meta.delete("Import", &args).await.unwrap());
    assert_eq!(store.value_len(), 0);
}

#[tokio::test]
async fn test_reference_shaped_string_rejected_at_dispatch() {
    let app = App::new(DelayConfig::default());
    let err = app
        .dispatcher
        .delay(dummy())
        .call("run", &[Reference::value("ENTITY:Article:1")])
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidReference(_)));
    assert_eq!(app.backend.queue_size("default"), 0);
}

#[test]
fn test_dedup_key_invariance() {
    let base = Envelope::build(&dummy(), "run", &[Reference::value(123)]).unwrap();
    let mut stamped = base.clone();
    stamped.stamp_enqueued_at();
    stamped.job_instance_id = Some(new_instance_id("default"));

    assert_eq!(
        DedupKey::compute(&base, None).unwrap(),
        DedupKey::compute(&stamped, None).unwrap()
    );

    let other_args = Envelope::build(&dummy(), "run", &[Reference::value(124)]).unwrap();
    assert_ne!(
        DedupKey::compute(&base, None).unwrap(),
        DedupKey::compute(&other_args, None).unwrap()
    );
}

#[test]
fn test_job_error_display() {
    let err = JobError::UnknownReceiver("Ghost".to_string());
    assert!(err.to_string().contains("Ghost"));
}
