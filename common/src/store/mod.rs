// Task persistence: business-scoped CRUD plus the due-task scan

pub mod memory;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

use crate::errors::StoreError;
use crate::models::{AutomationTask, NewTask, TaskPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistent store for automation task rows.
///
/// Every operation that touches `next_run` takes the reference instant as an
/// argument; implementations never read the wall clock themselves.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task. The cron expression is validated and the initial
    /// `next_run` computed from `now`; a malformed expression is rejected,
    /// never defaulted.
    async fn create_task(
        &self,
        task: NewTask,
        now: DateTime<Utc>,
    ) -> Result<AutomationTask, StoreError>;

    /// Fetch a task scoped to its owning business.
    async fn get_task(
        &self,
        id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<AutomationTask>, StoreError>;

    /// All tasks for a business, newest first.
    async fn list_tasks(&self, business_id: Uuid) -> Result<Vec<AutomationTask>, StoreError>;

    /// Active tasks whose `next_run` is unset or at/before `now`, across all
    /// businesses. No pagination is applied.
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<AutomationTask>, StoreError>;

    /// Partially update a task. `next_run` is re-derived from `now` only
    /// when the patch carries a new cron expression. Returns `Ok(None)` when
    /// no row matches the id/business pair.
    async fn update_task(
        &self,
        id: Uuid,
        business_id: Uuid,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AutomationTask>, StoreError>;

    /// Record a scheduled run: `last_run = now`, `next_run` advanced to the
    /// next occurrence of `cron` strictly after `now`. Returns the new
    /// `next_run`.
    async fn mark_run(
        &self,
        id: Uuid,
        cron: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError>;
}
