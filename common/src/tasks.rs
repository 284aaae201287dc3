// Control-surface operations over automation tasks
//
// The HTTP layer that fronts these operations lives elsewhere; everything
// here is plain store/queue orchestration.

use crate::clock::Clock;
use crate::errors::{ServiceError, StoreError};
use crate::models::{AutomationTask, JobPayload, NewTask, TaskPatch, TaskStatus, TaskType};
use crate::queue::{EnqueueOptions, JobQueue};
use crate::store::TaskStore;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Schedules every business starts with, one task per automation kind.
pub const DEFAULT_TASKS: [(TaskType, &str); 5] = [
    (TaskType::RankCheck, "0 6 * * *"),
    (TaskType::ReviewRequest, "0 9 * * 1"),
    (TaskType::SeoSuggestion, "0 10 1 * *"),
    (TaskType::ReportWeekly, "0 8 * * 1"),
    (TaskType::ReportMonthly, "0 8 1 * *"),
];

/// Task CRUD plus the trigger-now path.
pub struct AutomationService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    enqueue_options: EnqueueOptions,
}

impl AutomationService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        enqueue_options: EnqueueOptions,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            enqueue_options,
        }
    }

    pub async fn create_task(&self, task: NewTask) -> Result<AutomationTask, StoreError> {
        self.store.create_task(task, self.clock.now()).await
    }

    /// Seed a newly created business with the default automations.
    #[instrument(skip(self))]
    pub async fn create_default_tasks(
        &self,
        business_id: Uuid,
    ) -> Result<Vec<AutomationTask>, StoreError> {
        let mut tasks = Vec::with_capacity(DEFAULT_TASKS.len());
        for (task_type, cron) in DEFAULT_TASKS {
            let task = self
                .store
                .create_task(
                    NewTask {
                        business_id,
                        task_type,
                        schedule_cron: cron.to_string(),
                        payload: None,
                        status: TaskStatus::Active,
                    },
                    self.clock.now(),
                )
                .await?;
            tasks.push(task);
        }

        info!(business_id = %business_id, count = tasks.len(), "Created default automation tasks");
        Ok(tasks)
    }

    pub async fn list_tasks(&self, business_id: Uuid) -> Result<Vec<AutomationTask>, StoreError> {
        self.store.list_tasks(business_id).await
    }

    /// Partial update; `Ok(None)` when the task does not exist for this
    /// business.
    pub async fn update_task(
        &self,
        task_id: Uuid,
        business_id: Uuid,
        patch: TaskPatch,
    ) -> Result<Option<AutomationTask>, StoreError> {
        self.store
            .update_task(task_id, business_id, patch, self.clock.now())
            .await
    }

    /// Run a task now, outside its schedule: enqueue one job with the
    /// current payload and leave `last_run`/`next_run` untouched. Works on
    /// paused tasks too; pausing only affects scheduled scans.
    #[instrument(skip(self))]
    pub async fn trigger_task(
        &self,
        task_id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<AutomationTask>, ServiceError> {
        let Some(task) = self.store.get_task(task_id, business_id).await? else {
            return Ok(None);
        };

        self.queue
            .enqueue(
                task.task_type.as_str(),
                JobPayload::for_task(&task),
                self.enqueue_options,
            )
            .await?;

        info!(task_id = %task.id, task_type = %task.task_type, "Triggered automation task");
        Ok(Some(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryTaskStore;
    use chrono::TimeZone;
    use chrono::Utc;

    fn service() -> (
        Arc<MemoryTaskStore>,
        Arc<MemoryJobQueue>,
        Arc<ManualClock>,
        AutomationService,
    ) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryTaskStore::new());
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        let service = AutomationService::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            EnqueueOptions::default(),
        );
        (store, queue, clock, service)
    }

    #[tokio::test]
    async fn test_default_tasks_cover_every_business_kind() {
        let (_store, _queue, _clock, service) = service();
        let business_id = Uuid::new_v4();

        let tasks = service.create_default_tasks(business_id).await.unwrap();
        assert_eq!(tasks.len(), 5);

        for (task_type, cron) in DEFAULT_TASKS {
            let task = tasks.iter().find(|t| t.task_type == task_type).unwrap();
            assert_eq!(task.schedule_cron, cron);
            assert_eq!(task.status, TaskStatus::Active);
            assert!(task.next_run.is_some());
        }
    }

    #[tokio::test]
    async fn test_trigger_enqueues_without_touching_schedule() {
        let (store, queue, _clock, service) = service();
        let business_id = Uuid::new_v4();
        let task = service
            .create_task(NewTask {
                business_id,
                task_type: TaskType::RankCheck,
                schedule_cron: "0 6 * * *".to_string(),
                payload: Some(serde_json::json!({"keywords": ["dentist"]})),
                status: TaskStatus::Active,
            })
            .await
            .unwrap();

        let triggered = service
            .trigger_task(task.id, business_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triggered.next_run, task.next_run);
        assert_eq!(triggered.last_run, None);

        // The stored row is also untouched.
        let stored = store.get_task(task.id, business_id).await.unwrap().unwrap();
        assert_eq!(stored.next_run, task.next_run);
        assert_eq!(stored.last_run, None);

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.name, "rank_check");
        assert_eq!(job.payload.task_id, Some(task.id));
        assert_eq!(job.payload.business_id, Some(business_id));
    }

    #[tokio::test]
    async fn test_trigger_is_business_scoped() {
        let (_store, queue, _clock, service) = service();
        let task = service
            .create_task(NewTask {
                business_id: Uuid::new_v4(),
                task_type: TaskType::RankCheck,
                schedule_cron: "0 6 * * *".to_string(),
                payload: None,
                status: TaskStatus::Active,
            })
            .await
            .unwrap();

        let result = service
            .trigger_task(task.id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(queue.claim().await.unwrap().is_none(), "nothing enqueued");
    }

    #[tokio::test]
    async fn test_trigger_works_on_paused_tasks() {
        let (_store, queue, _clock, service) = service();
        let business_id = Uuid::new_v4();
        let task = service
            .create_task(NewTask {
                business_id,
                task_type: TaskType::ReviewRequest,
                schedule_cron: "0 9 * * 1".to_string(),
                payload: None,
                status: TaskStatus::Paused,
            })
            .await
            .unwrap();

        let triggered = service.trigger_task(task.id, business_id).await.unwrap();
        assert!(triggered.is_some());
        assert!(queue.claim().await.unwrap().is_some());
    }
}
