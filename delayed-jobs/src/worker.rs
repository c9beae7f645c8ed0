//! Polling worker that drains queues through an [`Executor`].

use crate::error::{JobError, JobResult};
use crate::execute::{Executor, Outcome};
use crate::traits::QueueBackend;
use chrono::Utc;
use delayed_log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval when every queue is empty
    pub poll_interval: Duration,

    /// Whether to log job execution
    pub log_execution: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            log_execution: true,
        }
    }
}

#[derive(Clone)]
struct Drain {
    backend: Arc<dyn QueueBackend>,
    executor: Arc<Executor>,
    queues: Arc<[String]>,
    log: bool,
}

impl Drain {
    async fn tick(&self) -> JobResult<Option<Outcome>> {
        let promoted = self.backend.promote_due(Utc::now()).await?;
        if promoted > 0 && self.log {
            debug!("Promoted {} scheduled jobs", promoted);
        }

        for queue in self.queues.iter() {
            let Some(envelope) = self.backend.dequeue(queue).await? else {
                continue;
            };

            if self.log {
                info!("Processing {} from {}", envelope.display_name(), queue);
            }
            let outcome = self.executor.execute(queue, &envelope).await?;
            if self.log {
                debug!("{} finished: {:?}", envelope.display_name(), outcome);
            }
            return Ok(Some(outcome));
        }
        Ok(None)
    }
}

/// Single-loop worker over one or more queues, checked in order.
///
/// Failed jobs are logged and dropped.
pub struct Worker {
    drain: Drain,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Create a new worker.
    pub fn new<I, S>(backend: Arc<dyn QueueBackend>, executor: Arc<Executor>, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(backend, executor, queues, WorkerConfig::default())
    }

    /// Create a worker with custom configuration.
    pub fn with_config<I, S>(
        backend: Arc<dyn QueueBackend>,
        executor: Arc<Executor>,
        queues: I,
        config: WorkerConfig,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            drain: Drain {
                backend,
                executor,
                queues: queues.into_iter().map(Into::into).collect(),
                log: config.log_execution,
            },
            config,
            running: Arc::new(RwLock::new(false)),
            handle: None,
        }
    }

    /// Queues in polling order.
    pub fn queues(&self) -> &[String] {
        &self.drain.queues
    }

    /// Promote due scheduled jobs, then run at most one ready job.
    ///
    /// Returns `None` when every queue was empty.
    pub async fn work_once(&self) -> JobResult<Option<Outcome>> {
        self.drain.tick().await
    }

    /// Start the worker.
    pub async fn start(&mut self) -> JobResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(JobError::WorkerAlreadyRunning);
        }
        *running = true;
        drop(running);

        if self.config.log_execution {
            info!("Worker starting on {:?}", self.drain.queues);
        }

        let drain = self.drain.clone();
        let running = self.running.clone();
        let poll_interval = self.config.poll_interval;

        self.handle = Some(tokio::spawn(async move {
            while *running.read().await {
                match drain.tick().await {
                    Ok(Some(_)) => {}
                    Ok(None) => tokio::time::sleep(poll_interval).await,
                    Err(e) if e.perform_error().is_some() => {
                        error!("Job failed: {}", e);
                    }
                    Err(e) => {
                        error!("Worker error: {}", e);
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
            if drain.log {
                info!("Worker stopped");
            }
        }));

        Ok(())
    }

    /// Stop the worker.
    pub async fn stop(&mut self) -> JobResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(JobError::WorkerNotRunning);
        }
        *running = false;
        drop(running);

        if self.config.log_execution {
            info!("Worker stopping...");
        }

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        Ok(())
    }

    /// Check if the worker is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
