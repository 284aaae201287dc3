// In-memory task store for tests and single-process runs

use crate::errors::StoreError;
use crate::models::{AutomationTask, NewTask, TaskPatch, TaskStatus};
use crate::schedule;
use crate::store::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Task store holding rows in process memory. Semantics mirror the Postgres
/// implementation exactly, which makes it the reference double in tests.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, AutomationTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks, for assertions.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Insert a row as-is, bypassing creation-time validation. Lets tests
    /// seed legacy shapes such as a task with no `next_run`.
    pub async fn insert(&self, task: AutomationTask) {
        self.tasks.write().await.insert(task.id, task);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(
        &self,
        task: NewTask,
        now: DateTime<Utc>,
    ) -> Result<AutomationTask, StoreError> {
        let next_run = schedule::next_occurrence(&task.schedule_cron, now)?;

        let task = AutomationTask {
            id: Uuid::new_v4(),
            business_id: task.business_id,
            task_type: task.task_type,
            schedule_cron: task.schedule_cron,
            payload: task.payload,
            status: task.status,
            last_run: None,
            next_run: Some(next_run),
            created_at: now,
            updated_at: now,
        };

        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(
        &self,
        id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<AutomationTask>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .get(&id)
            .filter(|t| t.business_id == business_id)
            .cloned())
    }

    async fn list_tasks(&self, business_id: Uuid) -> Result<Vec<AutomationTask>, StoreError> {
        let mut tasks: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.business_id == business_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<AutomationTask>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| {
                t.status == TaskStatus::Active
                    && t.next_run.map_or(true, |next_run| next_run <= now)
            })
            .cloned()
            .collect())
    }

    async fn update_task(
        &self,
        id: Uuid,
        business_id: Uuid,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AutomationTask>, StoreError> {
        let next_run = patch
            .schedule_cron
            .as_deref()
            .map(|cron| schedule::next_occurrence(cron, now))
            .transpose()?;

        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id).filter(|t| t.business_id == business_id) else {
            return Ok(None);
        };

        if let Some(cron) = patch.schedule_cron {
            task.schedule_cron = cron;
        }
        if let Some(payload) = patch.payload {
            task.payload = Some(payload);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(next_run) = next_run {
            task.next_run = Some(next_run);
        }
        task.updated_at = now;

        Ok(Some(task.clone()))
    }

    async fn mark_run(
        &self,
        id: Uuid,
        cron: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let next_run = schedule::next_occurrence(cron, now)?;

        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&id) {
            task.last_run = Some(now);
            task.next_run = Some(next_run);
            task.updated_at = now;
        }

        Ok(next_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;
    use chrono::TimeZone;

    fn store() -> MemoryTaskStore {
        MemoryTaskStore::new()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn new_task(business_id: Uuid) -> NewTask {
        NewTask {
            business_id,
            task_type: TaskType::RankCheck,
            schedule_cron: "0 6 * * *".to_string(),
            payload: None,
            status: TaskStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_create_computes_initial_next_run() {
        let store = store();
        let now = at(2024, 1, 1, 7, 0);
        let task = store.create_task(new_task(Uuid::new_v4()), now).await.unwrap();
        assert_eq!(task.next_run, Some(at(2024, 1, 2, 6, 0)));
        assert_eq!(task.last_run, None);
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_cron() {
        let store = store();
        let mut task = new_task(Uuid::new_v4());
        task.schedule_cron = "99 * * * *".to_string();
        let err = store.create_task(task, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Schedule(_)));
    }

    #[tokio::test]
    async fn test_get_task_is_business_scoped() {
        let store = store();
        let business_id = Uuid::new_v4();
        let task = store.create_task(new_task(business_id), Utc::now()).await.unwrap();

        assert!(store.get_task(task.id, business_id).await.unwrap().is_some());
        assert!(store
            .get_task(task.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_due_scan_selects_only_active_and_due() {
        let store = store();
        let created = at(2024, 1, 1, 0, 0);
        let business_id = Uuid::new_v4();

        let due = store.create_task(new_task(business_id), created).await.unwrap();
        let paused = store
            .create_task(
                NewTask {
                    status: TaskStatus::Paused,
                    ..new_task(business_id)
                },
                created,
            )
            .await
            .unwrap();
        let not_yet = store.create_task(new_task(business_id), created).await.unwrap();

        // Move the third task's schedule so it is not due at the scan time.
        store
            .update_task(
                not_yet.id,
                business_id,
                TaskPatch {
                    schedule_cron: Some("0 6 * * *".to_string()),
                    ..Default::default()
                },
                at(2024, 1, 2, 7, 0),
            )
            .await
            .unwrap();

        let scan_at = at(2024, 1, 2, 6, 30);
        let due_tasks = store.list_due_tasks(scan_at).await.unwrap();
        let due_ids: Vec<_> = due_tasks.iter().map(|t| t.id).collect();

        assert!(due_ids.contains(&due.id));
        assert!(!due_ids.contains(&paused.id), "paused task must not be due");
        assert!(!due_ids.contains(&not_yet.id));
    }

    #[tokio::test]
    async fn test_payload_only_update_keeps_next_run() {
        let store = store();
        let business_id = Uuid::new_v4();
        let now = at(2024, 1, 1, 7, 0);
        let task = store.create_task(new_task(business_id), now).await.unwrap();

        let updated = store
            .update_task(
                task.id,
                business_id,
                TaskPatch {
                    payload: Some(serde_json::json!({"recipients": ["a@b.c"]})),
                    ..Default::default()
                },
                at(2024, 1, 1, 12, 0),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.next_run, task.next_run);
        assert!(updated.payload.is_some());
    }

    #[tokio::test]
    async fn test_cron_update_rederives_next_run() {
        let store = store();
        let business_id = Uuid::new_v4();
        let task = store
            .create_task(new_task(business_id), at(2024, 1, 1, 7, 0))
            .await
            .unwrap();

        let updated = store
            .update_task(
                task.id,
                business_id,
                TaskPatch {
                    schedule_cron: Some("0 12 * * *".to_string()),
                    ..Default::default()
                },
                at(2024, 1, 1, 8, 0),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.next_run, Some(at(2024, 1, 1, 12, 0)));
    }

    #[tokio::test]
    async fn test_update_unknown_task_returns_none() {
        let store = store();
        let result = store
            .update_task(Uuid::new_v4(), Uuid::new_v4(), TaskPatch::default(), Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_mark_run_advances_past_now() {
        let store = store();
        let business_id = Uuid::new_v4();
        let task = store
            .create_task(new_task(business_id), at(2024, 1, 1, 7, 0))
            .await
            .unwrap();

        let ran_at = at(2024, 1, 2, 6, 0);
        let next = store.mark_run(task.id, &task.schedule_cron, ran_at).await.unwrap();
        assert_eq!(next, at(2024, 1, 3, 6, 0));

        let stored = store.get_task(task.id, business_id).await.unwrap().unwrap();
        assert_eq!(stored.last_run, Some(ran_at));
        assert_eq!(stored.next_run, Some(next));
    }
}
