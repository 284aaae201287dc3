// Property-based tests for the scheduler engine tick

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::backup::{BackupCycle, BackupRunner};
use common::clock::ManualClock;
use common::config::BackupConfig;
use common::errors::{BackupError, QueueError, StoreError};
use common::models::{AutomationTask, JobPayload, NewTask, TaskPatch, TaskStatus, TaskType};
use common::queue::{EnqueueOptions, JobQueue, MemoryJobQueue};
use common::scheduler::{SchedulerConfig, SchedulerEngine, TickOutcome};
use common::store::{MemoryTaskStore, TaskStore};
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap()
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryTaskStore>,
    queue: Arc<MemoryJobQueue>,
    engine: SchedulerEngine,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
    let engine = SchedulerEngine::new(
        SchedulerConfig::default(),
        store.clone(),
        queue.clone(),
        None,
        clock.clone(),
    );
    Harness {
        clock,
        store,
        queue,
        engine,
    }
}

async fn create_daily_task(
    store: &MemoryTaskStore,
    status: TaskStatus,
    created_at: DateTime<Utc>,
) -> AutomationTask {
    store
        .create_task(
            NewTask {
                business_id: Uuid::new_v4(),
                task_type: TaskType::RankCheck,
                schedule_cron: "0 6 * * *".to_string(),
                payload: None,
                status,
            },
            created_at,
        )
        .await
        .unwrap()
}

/// *For any* mix of due, paused, and not-yet-due tasks, a tick at time T
/// enqueues exactly one job per due task and leaves every due task with
/// `next_run` strictly greater than T. Paused tasks never enqueue.
#[test]
fn property_tick_enqueues_exactly_the_due_tasks() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    proptest!(|(n_due in 0usize..10, n_paused in 0usize..5, n_future in 0usize..5)| {
        rt.block_on(async {
            let h = harness();

            // Tasks created at 05:00 have next_run 06:00 of the same day.
            let mut due_tasks = Vec::new();
            for _ in 0..n_due {
                due_tasks.push(create_daily_task(&h.store, TaskStatus::Active, start()).await);
            }
            let mut paused_ids = Vec::new();
            for _ in 0..n_paused {
                paused_ids.push(create_daily_task(&h.store, TaskStatus::Paused, start()).await.id);
            }
            // Created after the tick instant, so next_run is tomorrow.
            let tick_at = start() + Duration::hours(2); // 07:00
            for _ in 0..n_future {
                create_daily_task(&h.store, TaskStatus::Active, tick_at).await;
            }

            h.clock.set(tick_at);
            let outcome = h.engine.tick().await;
            prop_assert_eq!(
                outcome,
                TickOutcome::Completed { enqueued: n_due, task_errors: 0 }
            );

            // Exactly one job per due task, none for anything else.
            let mut enqueued_for = std::collections::HashMap::new();
            while let Some(job) = h.queue.claim().await.unwrap() {
                let task_id = job.payload.task_id.unwrap();
                *enqueued_for.entry(task_id).or_insert(0usize) += 1;
                h.queue.complete(&job).await.unwrap();
            }
            prop_assert_eq!(enqueued_for.len(), n_due);
            for task in &due_tasks {
                prop_assert_eq!(enqueued_for.get(&task.id).copied(), Some(1));
            }
            for id in &paused_ids {
                prop_assert!(!enqueued_for.contains_key(id), "paused task was enqueued");
            }

            // Every due task advanced strictly past the tick instant.
            for task in &due_tasks {
                let row = h
                    .store
                    .get_task(task.id, task.business_id)
                    .await
                    .unwrap()
                    .unwrap();
                prop_assert!(row.next_run.unwrap() > tick_at);
                prop_assert_eq!(row.last_run, Some(tick_at));
            }
            Ok(())
        })?;
    });
}

/// A second tick immediately after the first finds nothing due.
#[tokio::test]
async fn test_tick_is_idempotent_until_the_next_occurrence() {
    let h = harness();
    create_daily_task(&h.store, TaskStatus::Active, start()).await;

    h.clock.set(start() + Duration::hours(2));
    assert_eq!(
        h.engine.tick().await,
        TickOutcome::Completed {
            enqueued: 1,
            task_errors: 0
        }
    );
    assert_eq!(
        h.engine.tick().await,
        TickOutcome::Completed {
            enqueued: 0,
            task_errors: 0
        }
    );
    assert_eq!(h.queue.pending_len(), 1);
}

/// A task with no next_run at all (a legacy row shape) counts as due and
/// gets one computed on its first scheduled run.
#[tokio::test]
async fn test_task_without_next_run_is_due() {
    let h = harness();
    let task = AutomationTask {
        id: Uuid::new_v4(),
        business_id: Uuid::new_v4(),
        task_type: TaskType::SeoSuggestion,
        schedule_cron: "0 10 1 * *".to_string(),
        payload: None,
        status: TaskStatus::Active,
        last_run: None,
        next_run: None,
        created_at: start(),
        updated_at: start(),
    };
    h.store.insert(task.clone()).await;

    let outcome = h.engine.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            enqueued: 1,
            task_errors: 0
        }
    );

    let row = h
        .store
        .get_task(task.id, task.business_id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.next_run.unwrap() > start());
}

// Queue double that fails enqueues for one specific job name.
struct FailingQueue {
    inner: Arc<MemoryJobQueue>,
    poison_name: String,
    rejected: AtomicUsize,
}

#[async_trait::async_trait]
impl JobQueue for FailingQueue {
    async fn enqueue(
        &self,
        name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        if name == self.poison_name {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(QueueError::EnqueueFailed("broker unavailable".to_string()));
        }
        self.inner.enqueue(name, payload, options).await
    }

    async fn claim(&self) -> Result<Option<common::queue::JobRecord>, QueueError> {
        self.inner.claim().await
    }

    async fn complete(&self, job: &common::queue::JobRecord) -> Result<(), QueueError> {
        self.inner.complete(job).await
    }

    async fn fail(
        &self,
        job: &common::queue::JobRecord,
        error: &str,
    ) -> Result<common::queue::RetryDisposition, QueueError> {
        self.inner.fail(job, error).await
    }

    async fn reclaim_stalled(
        &self,
        older_than: std::time::Duration,
    ) -> Result<usize, QueueError> {
        self.inner.reclaim_stalled(older_than).await
    }

    async fn recent_completed(
        &self,
    ) -> Result<Vec<common::queue::JobRecord>, QueueError> {
        self.inner.recent_completed().await
    }

    async fn recent_failed(&self) -> Result<Vec<common::queue::JobRecord>, QueueError> {
        self.inner.recent_failed().await
    }
}

/// One task failing to enqueue does not stop the rest of the tick, and the
/// failed task stays due for the next tick.
#[tokio::test]
async fn test_per_task_errors_are_isolated() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTaskStore::new());
    let inner = Arc::new(MemoryJobQueue::new(clock.clone()));
    let queue = Arc::new(FailingQueue {
        inner: inner.clone(),
        poison_name: "review_request".to_string(),
        rejected: AtomicUsize::new(0),
    });
    let engine = SchedulerEngine::new(
        SchedulerConfig::default(),
        store.clone(),
        queue.clone(),
        None,
        clock.clone(),
    );

    let business_id = Uuid::new_v4();
    let healthy = store
        .create_task(
            NewTask {
                business_id,
                task_type: TaskType::RankCheck,
                schedule_cron: "0 6 * * *".to_string(),
                payload: None,
                status: TaskStatus::Active,
            },
            start(),
        )
        .await
        .unwrap();
    let poisoned = store
        .create_task(
            NewTask {
                business_id,
                task_type: TaskType::ReviewRequest,
                schedule_cron: "0 6 * * *".to_string(),
                payload: None,
                status: TaskStatus::Active,
            },
            start(),
        )
        .await
        .unwrap();

    let tick_at = start() + Duration::hours(2);
    clock.set(tick_at);
    let outcome = engine.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            enqueued: 1,
            task_errors: 1
        }
    );
    assert_eq!(queue.rejected.load(Ordering::SeqCst), 1);

    // The healthy task advanced; the poisoned one did not and stays due.
    let healthy_row = store
        .get_task(healthy.id, business_id)
        .await
        .unwrap()
        .unwrap();
    assert!(healthy_row.next_run.unwrap() > tick_at);

    let poisoned_row = store
        .get_task(poisoned.id, business_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(poisoned_row.next_run, poisoned.next_run);
    assert!(store
        .list_due_tasks(tick_at)
        .await
        .unwrap()
        .iter()
        .any(|t| t.id == poisoned.id));
}

// Store double whose due scan always fails.
struct UnreachableStore;

#[async_trait::async_trait]
impl TaskStore for UnreachableStore {
    async fn create_task(
        &self,
        _task: NewTask,
        _now: DateTime<Utc>,
    ) -> Result<AutomationTask, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }

    async fn get_task(
        &self,
        _id: Uuid,
        _business_id: Uuid,
    ) -> Result<Option<AutomationTask>, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }

    async fn list_tasks(&self, _business_id: Uuid) -> Result<Vec<AutomationTask>, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }

    async fn list_due_tasks(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Vec<AutomationTask>, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }

    async fn update_task(
        &self,
        _id: Uuid,
        _business_id: Uuid,
        _patch: TaskPatch,
        _now: DateTime<Utc>,
    ) -> Result<Option<AutomationTask>, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }

    async fn mark_run(
        &self,
        _id: Uuid,
        _cron: &str,
        _now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        Err(StoreError::ConnectionFailed("down".to_string()))
    }
}

struct CountingRunner {
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl BackupRunner for CountingRunner {
    async fn run_backup(&self) -> Result<PathBuf, BackupError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from("/dev/null"))
    }
}

fn backup_cycle(
    dir: &std::path::Path,
    clock: Arc<ManualClock>,
    runner: Arc<CountingRunner>,
) -> Arc<BackupCycle> {
    let config = BackupConfig {
        cron: "0 2 * * *".to_string(),
        directory: dir.to_string_lossy().into_owned(),
        pg_dump_path: "pg_dump".to_string(),
    };
    Arc::new(BackupCycle::new(&config, runner, clock).unwrap())
}

/// A failed scan ends the tick early: no jobs, no backup check, and the
/// process keeps ticking.
#[tokio::test]
async fn test_scan_failure_ends_tick_early() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
    let runner = Arc::new(CountingRunner {
        runs: AtomicUsize::new(0),
    });
    let backup = backup_cycle(dir.path(), clock.clone(), runner.clone());

    let engine = SchedulerEngine::new(
        SchedulerConfig::default(),
        Arc::new(UnreachableStore),
        queue.clone(),
        Some(backup),
        clock.clone(),
    );

    assert_eq!(engine.tick().await, TickOutcome::ScanFailed);
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

    // The next tick runs independently; still failing, still contained.
    assert_eq!(engine.tick().await, TickOutcome::ScanFailed);
}

/// The backup due-check runs inside the tick even when individual tasks
/// error, and actually runs the backup once its occurrence arrives.
#[tokio::test]
async fn test_backup_runs_within_the_tick() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTaskStore::new());
    let inner = Arc::new(MemoryJobQueue::new(clock.clone()));
    let queue = Arc::new(FailingQueue {
        inner,
        poison_name: "rank_check".to_string(),
        rejected: AtomicUsize::new(0),
    });
    let runner = Arc::new(CountingRunner {
        runs: AtomicUsize::new(0),
    });
    let backup = backup_cycle(dir.path(), clock.clone(), runner.clone());

    let engine = SchedulerEngine::new(
        SchedulerConfig::default(),
        store.clone(),
        queue,
        Some(backup),
        clock.clone(),
    );

    create_daily_task(&store, TaskStatus::Active, start()).await;

    // First tick initializes the backup schedule (02:00 next day).
    h_tick(&engine, &clock, start() + Duration::hours(2)).await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

    // Past 02:00 the next day: the backup runs even though the only due
    // task keeps failing to enqueue.
    h_tick(&engine, &clock, start() + Duration::hours(22)).await; // 03:00 next day
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
}

async fn h_tick(engine: &SchedulerEngine, clock: &ManualClock, at: DateTime<Utc>) {
    clock.set(at);
    engine.tick().await;
}

// Queue double that parks every enqueue until released, to hold a tick open.
struct BlockingQueue {
    inner: Arc<MemoryJobQueue>,
    entered: Arc<tokio::sync::Notify>,
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl JobQueue for BlockingQueue {
    async fn enqueue(
        &self,
        name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.enqueue(name, payload, options).await
    }

    async fn claim(&self) -> Result<Option<common::queue::JobRecord>, QueueError> {
        self.inner.claim().await
    }

    async fn complete(&self, job: &common::queue::JobRecord) -> Result<(), QueueError> {
        self.inner.complete(job).await
    }

    async fn fail(
        &self,
        job: &common::queue::JobRecord,
        error: &str,
    ) -> Result<common::queue::RetryDisposition, QueueError> {
        self.inner.fail(job, error).await
    }

    async fn reclaim_stalled(
        &self,
        older_than: std::time::Duration,
    ) -> Result<usize, QueueError> {
        self.inner.reclaim_stalled(older_than).await
    }

    async fn recent_completed(
        &self,
    ) -> Result<Vec<common::queue::JobRecord>, QueueError> {
        self.inner.recent_completed().await
    }

    async fn recent_failed(&self) -> Result<Vec<common::queue::JobRecord>, QueueError> {
        self.inner.recent_failed().await
    }
}

/// A tick that starts while another is still running is skipped, not
/// interleaved.
#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(MemoryTaskStore::new());
    let inner = Arc::new(MemoryJobQueue::new(clock.clone()));
    let entered = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::new(tokio::sync::Notify::new());
    let queue = Arc::new(BlockingQueue {
        inner: inner.clone(),
        entered: entered.clone(),
        gate: gate.clone(),
    });

    create_daily_task(&store, TaskStatus::Active, start()).await;

    let engine = Arc::new(SchedulerEngine::new(
        SchedulerConfig::default(),
        store,
        queue,
        None,
        clock.clone(),
    ));

    clock.set(start() + Duration::hours(2));
    let first = engine.clone();
    let first_tick = tokio::spawn(async move { first.tick().await });

    // Wait until the first tick is parked inside the enqueue.
    entered.notified().await;
    assert_eq!(engine.tick().await, TickOutcome::Skipped);

    gate.notify_one();
    assert_eq!(
        first_tick.await.unwrap(),
        TickOutcome::Completed {
            enqueued: 1,
            task_errors: 0
        }
    );

    // Once the first tick finished, ticking works again.
    assert_eq!(
        engine.tick().await,
        TickOutcome::Completed {
            enqueued: 0,
            task_errors: 0
        }
    );
}

/// The loop's first tick fires immediately at start, not after the first
/// interval.
#[tokio::test(start_paused = true)]
async fn test_first_tick_fires_at_start() {
    let clock = Arc::new(ManualClock::new(start() + Duration::hours(2)));
    let store = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(MemoryJobQueue::new(clock.clone()));

    create_daily_task(&store, TaskStatus::Active, start()).await;

    let engine = Arc::new(SchedulerEngine::new(
        SchedulerConfig::default(),
        store,
        queue.clone(),
        None,
        clock,
    ));

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    // Well under one 60s interval: the immediate first tick already ran.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    engine.stop();
    handle.await.unwrap();

    assert_eq!(queue.pending_len(), 1);
}
