use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Automation tasks
// ============================================================================

/// The closed set of automation job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RankCheck,
    ReviewRequest,
    SeoSuggestion,
    ReportWeekly,
    ReportMonthly,
    Backup,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RankCheck => "rank_check",
            TaskType::ReviewRequest => "review_request",
            TaskType::SeoSuggestion => "seo_suggestion",
            TaskType::ReportWeekly => "report_weekly",
            TaskType::ReportMonthly => "report_monthly",
            TaskType::Backup => "backup",
        }
    }

    pub const ALL: [TaskType; 6] = [
        TaskType::RankCheck,
        TaskType::ReviewRequest,
        TaskType::SeoSuggestion,
        TaskType::ReportWeekly,
        TaskType::ReportMonthly,
        TaskType::Backup,
    ];
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTaskType(s.to_string()))
    }
}

/// A job name that does not match any known task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTaskType(pub String);

impl fmt::Display for UnknownTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown task type '{}'", self.0)
    }
}

impl std::error::Error for UnknownTaskType {}

/// Whether a task participates in scheduled scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::RankCheck
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Active
    }
}

/// A recurring automation definition owned by a business.
///
/// `next_run` is always the earliest cron occurrence strictly after the
/// instant it was computed from. A paused task keeps its `next_run` but is
/// never selected as due.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AutomationTask {
    pub id: Uuid,
    pub business_id: Uuid,
    #[sqlx(skip)]
    pub task_type: TaskType,
    pub schedule_cron: String,
    pub payload: Option<serde_json::Value>,
    #[sqlx(skip)]
    pub status: TaskStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub business_id: Uuid,
    pub task_type: TaskType,
    pub schedule_cron: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Partial update for a task. Absent fields are left untouched;
/// `next_run` is re-derived only when `schedule_cron` is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.schedule_cron.is_none() && self.payload.is_none() && self.status.is_none()
    }
}

// ============================================================================
// Queue jobs
// ============================================================================

/// Payload carried by every queued job. Global jobs (backup) carry no ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl JobPayload {
    pub fn for_task(task: &AutomationTask) -> Self {
        Self {
            task_id: Some(task.id),
            business_id: Some(task.business_id),
            payload: task.payload.clone(),
        }
    }
}

// ============================================================================
// Backup cycle
// ============================================================================

/// Singleton due/advance state for the database backup, persisted as a JSON
/// file outside the primary datastore.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupState {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}
