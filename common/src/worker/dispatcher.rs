// Job dispatcher: claims queued jobs and routes them to typed handlers

use crate::models::{JobPayload, TaskType};
use crate::queue::{JobQueue, JobRecord, RetryDisposition};
use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What a handler receives. Global jobs (backup) carry neither field.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub business_id: Option<Uuid>,
    pub payload: Option<Value>,
}

impl From<&JobPayload> for JobContext {
    fn from(payload: &JobPayload) -> Self {
        Self {
            business_id: payload.business_id,
            payload: payload.payload.clone(),
        }
    }
}

/// Domain logic for one job kind.
///
/// Delivery is at-least-once, and the scheduler can enqueue a task again
/// while a prior run is still executing. Implementations must therefore
/// tolerate duplicate invocations — for outbound notifications that means
/// deduplicating by recipient and content/day rather than assuming a single
/// delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> anyhow::Result<()>;
}

/// Closed mapping from job kind to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: TaskType, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: TaskType) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Dispatcher loop configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Active jobs claimed longer than this ago are presumed lost and
    /// re-queued.
    pub stalled_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stalled_after: Duration::from_secs(300),
        }
    }
}

/// Long-lived queue consumer. Several dispatchers may run concurrently
/// against the same queue; the queue serializes delivery per attempt, but
/// nothing serializes distinct attempts of the same task, which is a handler
/// obligation, not a dispatcher one.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<HandlerRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Request graceful shutdown; the loop exits after the in-flight job.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Consume jobs until shutdown is requested.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!("Dispatcher started");
        let mut last_reclaim = tokio::time::Instant::now();
        // Sweep for stalled jobs at twice the lease frequency.
        let reclaim_every = self.config.stalled_after / 2;

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            if last_reclaim.elapsed() >= reclaim_every {
                last_reclaim = tokio::time::Instant::now();
                if let Err(e) = self.queue.reclaim_stalled(self.config.stalled_after).await {
                    error!(error = %e, "Stalled-job reclaim failed");
                }
            }

            match self.queue.claim().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {
                    self.idle().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    self.idle().await;
                }
            }
        }

        info!("Dispatcher stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.shutdown_notify.notified() => {}
        }
    }

    /// Execute one claimed job and report the outcome back to the queue.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name, attempt = job.attempt))]
    pub async fn process(&self, job: JobRecord) {
        let handler = match job.name.parse::<TaskType>() {
            Ok(kind) => self.registry.get(kind),
            Err(_) => None,
        };

        let Some(handler) = handler else {
            // Unknown or unregistered job kinds are dropped, not retried;
            // a renamed task type must never become a poison message.
            warn!(job_name = %job.name, "No handler for job, dropping");
            counter!("automation_jobs_dropped_total").increment(1);
            if let Err(e) = self.queue.complete(&job).await {
                error!(error = %e, "Failed to acknowledge dropped job");
            }
            return;
        };

        let ctx = JobContext::from(&job.payload);
        match handler.handle(ctx).await {
            Ok(()) => {
                counter!("automation_jobs_completed_total").increment(1);
                info!("Automation job completed");
                if let Err(e) = self.queue.complete(&job).await {
                    error!(error = %e, "Failed to acknowledge completed job");
                }
            }
            Err(handler_error) => {
                match self.queue.fail(&job, &handler_error.to_string()).await {
                    Ok(RetryDisposition::Retry { ready_at }) => {
                        counter!("automation_jobs_retried_total").increment(1);
                        warn!(
                            error = %handler_error,
                            retry_at = %ready_at,
                            "Automation job failed, retry scheduled"
                        );
                    }
                    Ok(RetryDisposition::Exhausted) => {
                        counter!("automation_jobs_failed_total").increment(1);
                        error!(
                            error = %handler_error,
                            attempts = job.attempt,
                            "Automation job failed permanently"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to report job failure to queue");
                    }
                }
            }
        }
    }
}
