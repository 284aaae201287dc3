// Redis-backed job queue
//
// Layout mirrors the classic Redis queue shape: a waiting list, delayed and
// active sorted sets scored by epoch milliseconds, per-job JSON bodies, and
// capped completed/failed lists for retention. Operations are not atomic
// across keys; the delivery guarantee is at-least-once, and a consumer crash
// between execution and acknowledgment results in redelivery via the
// stalled-job reclaim.

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::db::RedisPool;
use crate::errors::QueueError;
use crate::models::JobPayload;
use crate::queue::{EnqueueOptions, JobQueue, JobRecord, JobState, RetryDisposition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// How many delayed jobs to promote per claim.
const PROMOTE_BATCH: isize = 64;

pub struct RedisJobQueue {
    pool: RedisPool,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    keep_completed: usize,
    keep_failed: usize,
}

impl RedisJobQueue {
    pub fn new(pool: RedisPool, config: &QueueConfig) -> Self {
        Self::with_clock(pool, config, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: RedisPool, config: &QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            key_prefix: config.key_prefix.clone(),
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    async fn load_job(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        id: Uuid,
    ) -> Result<Option<JobRecord>, QueueError> {
        let body: Option<String> = conn.get(self.job_key(id)).await.map_err(QueueError::from)?;
        body.map(|body| {
            serde_json::from_str(&body)
                .map_err(|e| QueueError::DeserializationFailed(e.to_string()))
        })
        .transpose()
    }

    async fn save_job(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        job: &JobRecord,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(job)?;
        let _: () = conn
            .set(self.job_key(job.id), body)
            .await
            .map_err(QueueError::from)?;
        Ok(())
    }

    /// Move delayed jobs whose ready time has passed onto the waiting list.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let due: Vec<String> = conn
            .zrangebyscore_limit(
                self.key("delayed"),
                f64::NEG_INFINITY,
                now.timestamp_millis() as f64,
                0,
                PROMOTE_BATCH,
            )
            .await
            .map_err(QueueError::from)?;

        for id in due {
            // Only the caller that wins the removal promotes the job, so a
            // concurrent promoter cannot double-queue it.
            let removed: i64 = conn
                .zrem(self.key("delayed"), &id)
                .await
                .map_err(QueueError::from)?;
            if removed > 0 {
                let _: () = conn
                    .rpush(self.key("waiting"), &id)
                    .await
                    .map_err(QueueError::from)?;
            }
        }

        Ok(())
    }

    async fn push_finished(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        list: &str,
        keep: usize,
        job: &JobRecord,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(job)?;
        let _: () = conn
            .lpush(self.key(list), body)
            .await
            .map_err(QueueError::from)?;
        let _: () = conn
            .ltrim(self.key(list), 0, keep as isize - 1)
            .await
            .map_err(QueueError::from)?;
        let _: () = conn
            .del(self.job_key(job.id))
            .await
            .map_err(QueueError::from)?;
        let _: () = conn
            .zrem(self.key("active"), job.id.to_string())
            .await
            .map_err(QueueError::from)?;
        Ok(())
    }

    async fn load_finished(&self, list: &str) -> Result<Vec<JobRecord>, QueueError> {
        let mut conn = self.pool.connection();
        let bodies: Vec<String> = conn
            .lrange(self.key(list), 0, -1)
            .await
            .map_err(QueueError::from)?;
        bodies
            .iter()
            .map(|body| {
                serde_json::from_str(body)
                    .map_err(|e| QueueError::DeserializationFailed(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, payload, options), fields(job_name = name))]
    async fn enqueue(
        &self,
        name: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        let now = self.clock.now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
            attempt: 0,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            state: JobState::Waiting,
            ready_at: now,
            enqueued_at: now,
            claimed_at: None,
            finished_at: None,
            last_error: None,
        };

        let mut conn = self.pool.connection();
        self.save_job(&mut conn, &record).await?;
        let _: () = conn
            .rpush(self.key("waiting"), record.id.to_string())
            .await
            .map_err(|e| QueueError::EnqueueFailed(e.to_string()))?;

        Ok(record.id)
    }

    async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = self.clock.now();
        let mut conn = self.pool.connection();
        self.promote_due(&mut conn, now).await?;

        loop {
            let id: Option<String> = conn
                .lpop(self.key("waiting"), None)
                .await
                .map_err(QueueError::from)?;
            let Some(id) = id else {
                return Ok(None);
            };
            let id: Uuid = id
                .parse()
                .map_err(|_| QueueError::DeserializationFailed(format!("bad job id '{id}'")))?;

            let Some(mut job) = self.load_job(&mut conn, id).await? else {
                // Body expired or was finished elsewhere; skip the orphan id.
                warn!(job_id = %id, "Skipping waiting entry without a job body");
                continue;
            };

            job.attempt += 1;
            job.state = JobState::Active;
            job.claimed_at = Some(now);
            self.save_job(&mut conn, &job).await?;
            let _: () = conn
                .zadd(
                    self.key("active"),
                    id.to_string(),
                    now.timestamp_millis() as f64,
                )
                .await
                .map_err(QueueError::from)?;

            return Ok(Some(job));
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut conn = self.pool.connection();

        let mut record = self
            .load_job(&mut conn, job.id)
            .await?
            .unwrap_or_else(|| job.clone());
        record.state = JobState::Completed;
        record.finished_at = Some(now);

        self.push_finished(&mut conn, "completed", self.keep_completed, &record)
            .await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name, attempt = job.attempt))]
    async fn fail(&self, job: &JobRecord, error: &str) -> Result<RetryDisposition, QueueError> {
        let now = self.clock.now();
        let mut conn = self.pool.connection();

        let mut record = self
            .load_job(&mut conn, job.id)
            .await?
            .unwrap_or_else(|| job.clone());
        record.last_error = Some(error.to_string());

        if record.attempt >= record.max_attempts {
            record.state = JobState::Failed;
            record.finished_at = Some(now);
            self.push_finished(&mut conn, "failed", self.keep_failed, &record)
                .await?;
            return Ok(RetryDisposition::Exhausted);
        }

        let ready_at = now + record.backoff.delay_after(record.attempt);
        record.state = JobState::Delayed;
        record.ready_at = ready_at;
        record.claimed_at = None;
        self.save_job(&mut conn, &record).await?;
        let _: () = conn
            .zrem(self.key("active"), job.id.to_string())
            .await
            .map_err(QueueError::from)?;
        let _: () = conn
            .zadd(
                self.key("delayed"),
                job.id.to_string(),
                ready_at.timestamp_millis() as f64,
            )
            .await
            .map_err(QueueError::from)?;

        Ok(RetryDisposition::Retry { ready_at })
    }

    async fn reclaim_stalled(
        &self,
        older_than: std::time::Duration,
    ) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let mut conn = self.pool.connection();

        let stalled: Vec<String> = conn
            .zrangebyscore_limit(
                self.key("active"),
                f64::NEG_INFINITY,
                cutoff.timestamp_millis() as f64,
                0,
                PROMOTE_BATCH,
            )
            .await
            .map_err(QueueError::from)?;

        let mut reclaimed = 0;
        for id in stalled {
            let removed: i64 = conn
                .zrem(self.key("active"), &id)
                .await
                .map_err(QueueError::from)?;
            if removed == 0 {
                continue;
            }

            if let Ok(parsed) = id.parse::<Uuid>() {
                if let Some(mut job) = self.load_job(&mut conn, parsed).await? {
                    job.state = JobState::Waiting;
                    job.claimed_at = None;
                    self.save_job(&mut conn, &job).await?;
                }
            }

            let _: () = conn
                .rpush(self.key("waiting"), &id)
                .await
                .map_err(QueueError::from)?;
            reclaimed += 1;
        }

        if reclaimed > 0 {
            warn!(count = reclaimed, "Re-queued stalled jobs");
        }
        Ok(reclaimed)
    }

    async fn recent_completed(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.load_finished("completed").await
    }

    async fn recent_failed(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.load_finished("failed").await
    }
}
