// Scheduler engine implementation

use crate::backup::BackupCycle;
use crate::clock::Clock;
use crate::models::{AutomationTask, JobPayload};
use crate::queue::{EnqueueOptions, JobQueue};
use crate::store::TaskStore;
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock interval between due-task scans (in seconds)
    pub tick_interval_seconds: u64,
    /// Delivery options applied to every job the scheduler enqueues
    pub enqueue_options: EnqueueOptions,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            enqueue_options: EnqueueOptions::default(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still running; this one was coalesced away.
    Skipped,
    /// The due-task scan failed; the tick ended early and the next tick
    /// retries independently.
    ScanFailed,
    /// The tick ran to completion.
    Completed {
        enqueued: usize,
        task_errors: usize,
    },
}

/// Periodic scheduler: every tick it scans for due tasks, enqueues one job
/// per due task, and advances each task's next run from the tick instant.
///
/// Advancing happens at enqueue time, not at completion time, so scheduling
/// cadence never drifts with handler latency; the trade-off is that a task
/// can be enqueued again while a prior run is still executing, and handlers
/// must tolerate that.
pub struct SchedulerEngine {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    backup: Option<Arc<BackupCycle>>,
    clock: Arc<dyn Clock>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    tick_running: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        backup: Option<Arc<BackupCycle>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            store,
            queue,
            backup,
            clock,
            shutdown_tx,
            tick_running: AtomicBool::new(false),
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the tick loop until `stop` is called. The first tick fires
    /// immediately; overlapping ticks are skipped rather than interleaved.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting scheduler engine"
        );

        let mut tick_interval = tokio::time::interval(Duration::from_secs(
            self.config.tick_interval_seconds,
        ));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
    }

    /// Stop the scheduler after the in-flight tick, if any.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Execute one tick: scan, enqueue, advance, then the backup due-check.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        if self.tick_running.swap(true, Ordering::SeqCst) {
            warn!("Previous tick still running, skipping this tick");
            counter!("automation_ticks_skipped_total").increment(1);
            return TickOutcome::Skipped;
        }

        let started = std::time::Instant::now();
        let outcome = self.run_tick().await;
        self.tick_running.store(false, Ordering::SeqCst);

        counter!("automation_ticks_total").increment(1);
        histogram!("automation_tick_duration_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn run_tick(&self) -> TickOutcome {
        let now = self.clock.now();

        let due_tasks = match self.store.list_due_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                // The store being unreachable ends the tick; the process
                // keeps running and the next tick retries on its own.
                error!(error = %e, "Due-task scan failed, ending tick early");
                counter!("automation_scan_failures_total").increment(1);
                return TickOutcome::ScanFailed;
            }
        };

        let mut enqueued = 0;
        let mut task_errors = 0;

        for task in &due_tasks {
            match self.schedule_task(task, now).await {
                Ok(()) => {
                    enqueued += 1;
                    info!(
                        task_id = %task.id,
                        business_id = %task.business_id,
                        task_type = %task.task_type,
                        "Scheduled automation task"
                    );
                }
                Err(e) => {
                    // One task failing must not starve the rest of the scan.
                    task_errors += 1;
                    counter!("automation_task_errors_total").increment(1);
                    error!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        error = %e,
                        "Failed to schedule automation task"
                    );
                }
            }
        }

        counter!("automation_jobs_enqueued_total").increment(enqueued as u64);

        if let Some(backup) = &self.backup {
            if let Err(e) = backup.run_if_due().await {
                error!(error = %e, "Backup cycle failed");
            }
        }

        TickOutcome::Completed {
            enqueued,
            task_errors,
        }
    }

    /// Enqueue one job for a due task, then advance its schedule from the
    /// tick instant.
    async fn schedule_task(
        &self,
        task: &AutomationTask,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        self.queue
            .enqueue(
                task.task_type.as_str(),
                JobPayload::for_task(task),
                self.config.enqueue_options,
            )
            .await?;

        self.store.mark_run(task.id, &task.schedule_cron, now).await?;

        Ok(())
    }
}
