// Postgres-backed task store
//
// Table DDL lives in migrations/ at the workspace root; migrations are run
// separately from the services.

use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{AutomationTask, NewTask, TaskPatch};
use crate::schedule;
use crate::store::TaskStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

/// Task store backed by the `automation_tasks` table.
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn task_from_row(row: &PgRow) -> Result<AutomationTask, StoreError> {
        let task_type: String = row.try_get("task_type")?;
        let status: String = row.try_get("status")?;

        Ok(AutomationTask {
            id: row.try_get("id")?,
            business_id: row.try_get("business_id")?,
            task_type: task_type
                .parse()
                .map_err(|e| StoreError::InvalidRow(format!("task_type: {e}")))?,
            schedule_cron: row.try_get("schedule_cron")?,
            payload: row.try_get("payload")?,
            status: status
                .parse()
                .map_err(|e| StoreError::InvalidRow(format!("status: {e}")))?,
            last_run: row.try_get("last_run")?,
            next_run: row.try_get("next_run")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(business_id = %task.business_id, task_type = %task.task_type))]
    async fn create_task(
        &self,
        task: NewTask,
        now: DateTime<Utc>,
    ) -> Result<AutomationTask, StoreError> {
        let next_run = schedule::next_occurrence(&task.schedule_cron, now)?;

        let row = sqlx::query(
            r#"
            INSERT INTO automation_tasks
                (id, business_id, task_type, schedule_cron, payload, status,
                 next_run, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(task.business_id)
        .bind(task.task_type.as_str())
        .bind(&task.schedule_cron)
        .bind(&task.payload)
        .bind(task.status.as_str())
        .bind(next_run)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await?;

        Self::task_from_row(&row)
    }

    async fn get_task(
        &self,
        id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<AutomationTask>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM automation_tasks WHERE id = $1 AND business_id = $2",
        )
        .bind(id)
        .bind(business_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    async fn list_tasks(&self, business_id: Uuid) -> Result<Vec<AutomationTask>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM automation_tasks WHERE business_id = $1 ORDER BY created_at DESC",
        )
        .bind(business_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(Self::task_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<AutomationTask>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM automation_tasks
            WHERE status = 'active'
              AND (next_run IS NULL OR next_run <= $1)
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await?;

        let tasks: Result<Vec<_>, _> = rows.iter().map(Self::task_from_row).collect();
        let tasks = tasks?;
        tracing::debug!(count = tasks.len(), "Found due automation tasks");
        Ok(tasks)
    }

    #[instrument(skip(self, patch))]
    async fn update_task(
        &self,
        id: Uuid,
        business_id: Uuid,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AutomationTask>, StoreError> {
        // A new cron expression re-derives next_run; any other patch leaves
        // the schedule untouched.
        let next_run = patch
            .schedule_cron
            .as_deref()
            .map(|cron| schedule::next_occurrence(cron, now))
            .transpose()?;

        let row = sqlx::query(
            r#"
            UPDATE automation_tasks
            SET schedule_cron = COALESCE($1, schedule_cron),
                payload = COALESCE($2, payload),
                status = COALESCE($3, status),
                next_run = COALESCE($4, next_run),
                updated_at = $5
            WHERE id = $6 AND business_id = $7
            RETURNING *
            "#,
        )
        .bind(&patch.schedule_cron)
        .bind(&patch.payload)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(next_run)
        .bind(now)
        .bind(id)
        .bind(business_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn mark_run(
        &self,
        id: Uuid,
        cron: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let next_run = schedule::next_occurrence(cron, now)?;

        sqlx::query(
            r#"
            UPDATE automation_tasks
            SET last_run = $1, next_run = $2, updated_at = $1
            WHERE id = $3
            "#,
        )
        .bind(now)
        .bind(next_run)
        .bind(id)
        .execute(self.pool.pool())
        .await?;

        Ok(next_run)
    }
}
