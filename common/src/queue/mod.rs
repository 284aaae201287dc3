// Durable job queue with at-least-once delivery, retry backoff, and
// bounded retention of finished jobs

pub mod memory;
pub mod redis;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

use crate::errors::QueueError;
use crate::models::JobPayload;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exponential retry backoff: the delay doubles after every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay applied after the given failed attempt (1-based): base delay
    /// after the first failure, doubled for each failure after that.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(failed_attempt.saturating_sub(1));
        let millis = self.base_delay_ms.saturating_mul(factor);
        Duration::milliseconds(millis.min(i64::MAX as u64) as i64)
    }
}

/// Delivery options for a job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Total delivery attempts before the job is terminally failed.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Queue-side lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// A queued job and its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Job name; the task-type string for scheduled automations.
    pub name: String,
    pub payload: JobPayload,
    /// Delivery attempts so far; incremented when a consumer claims the job.
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub state: JobState,
    /// Earliest instant the job may be delivered (moved forward by retries).
    pub ready_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outcome of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// The job re-enters the delayed set and will be delivered again.
    Retry { ready_at: DateTime<Utc> },
    /// Attempts are exhausted; the job is terminally failed.
    Exhausted,
}

/// Durable at-least-once job queue.
///
/// A given job is delivered to at most one consumer per attempt, but a
/// consumer crash between execution and acknowledgment yields redelivery,
/// so handlers must tolerate duplicate side effects. Completed and failed
/// records are retained only up to fixed caps.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job for delivery. Returns its id.
    async fn enqueue(
        &self,
        name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError>;

    /// Claim the next ready job, if any, marking it active and counting the
    /// delivery attempt.
    async fn claim(&self) -> Result<Option<JobRecord>, QueueError>;

    /// Acknowledge a claimed job as successfully handled.
    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError>;

    /// Report a failed attempt; the queue either schedules a retry with
    /// backoff or moves the job to its terminal failed state.
    async fn fail(&self, job: &JobRecord, error: &str) -> Result<RetryDisposition, QueueError>;

    /// Re-queue active jobs claimed longer than `older_than` ago (presumed
    /// lost to a crashed consumer).
    async fn reclaim_stalled(&self, older_than: std::time::Duration)
        -> Result<usize, QueueError>;

    /// Retained completed records, most recent first.
    async fn recent_completed(&self) -> Result<Vec<JobRecord>, QueueError>;

    /// Retained terminally failed records, most recent first.
    async fn recent_failed(&self) -> Result<Vec<JobRecord>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.delay_after(1), Duration::seconds(60));
        assert_eq!(backoff.delay_after(2), Duration::seconds(120));
        assert_eq!(backoff.delay_after(3), Duration::seconds(240));
    }

    #[test]
    fn test_backoff_zeroth_attempt_clamps_to_base() {
        let backoff = BackoffPolicy {
            base_delay_ms: 1_000,
        };
        assert_eq!(backoff.delay_after(0), Duration::seconds(1));
    }

    #[test]
    fn test_default_options_match_delivery_policy() {
        let options = EnqueueOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.backoff.base_delay_ms, 60_000);
    }

    #[test]
    fn test_job_record_round_trips_through_json() {
        let record = JobRecord {
            id: Uuid::new_v4(),
            name: "rank_check".to_string(),
            payload: JobPayload::default(),
            attempt: 1,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            state: JobState::Active,
            ready_at: Utc::now(),
            enqueued_at: Utc::now(),
            claimed_at: Some(Utc::now()),
            finished_at: None,
            last_error: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        let parsed: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.state, JobState::Active);
        assert_eq!(parsed.attempt, 1);
    }
}
