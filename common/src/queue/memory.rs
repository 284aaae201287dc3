// In-memory job queue with the same delivery semantics as the Redis queue

use crate::clock::Clock;
use crate::errors::QueueError;
use crate::models::JobPayload;
use crate::queue::{EnqueueOptions, JobQueue, JobRecord, JobState, RetryDisposition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

struct QueueState {
    jobs: HashMap<Uuid, JobRecord>,
    waiting: VecDeque<Uuid>,
    delayed: Vec<Uuid>,
    completed: VecDeque<JobRecord>,
    failed: VecDeque<JobRecord>,
}

/// Process-local queue used by tests and single-process deployments.
/// Driven entirely by the injected clock, so retry timelines are
/// deterministic under test.
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    keep_completed: usize,
    keep_failed: usize,
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(clock, 50, 100)
    }

    pub fn with_retention(
        clock: Arc<dyn Clock>,
        keep_completed: usize,
        keep_failed: usize,
    ) -> Self {
        Self {
            clock,
            keep_completed,
            keep_failed,
            state: Mutex::new(QueueState {
                jobs: HashMap::new(),
                waiting: VecDeque::new(),
                delayed: Vec::new(),
                completed: VecDeque::new(),
                failed: VecDeque::new(),
            }),
        }
    }

    /// Jobs currently waiting or delayed, for assertions.
    pub fn pending_len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.waiting.len() + state.delayed.len()
    }

    /// Move delayed jobs whose ready time has arrived onto the waiting list,
    /// earliest first.
    fn promote_due(state: &mut QueueState, now: DateTime<Utc>) {
        let mut due: Vec<Uuid> = state
            .delayed
            .iter()
            .copied()
            .filter(|id| {
                state
                    .jobs
                    .get(id)
                    .map_or(true, |job| job.ready_at <= now)
            })
            .collect();
        due.sort_by_key(|id| state.jobs.get(id).map(|job| job.ready_at));
        state.delayed.retain(|id| !due.contains(id));
        for id in due {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.state = JobState::Waiting;
                state.waiting.push_back(id);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
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

        let mut state = self.state.lock().unwrap();
        state.waiting.push_back(record.id);
        let id = record.id;
        state.jobs.insert(id, record);
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        Self::promote_due(&mut state, now);

        while let Some(id) = state.waiting.pop_front() {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.attempt += 1;
                job.state = JobState::Active;
                job.claimed_at = Some(now);
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        let Some(mut record) = state.jobs.remove(&job.id) else {
            return Err(QueueError::AckFailed(format!("unknown job {}", job.id)));
        };

        record.state = JobState::Completed;
        record.finished_at = Some(now);
        state.completed.push_front(record);
        state.completed.truncate(self.keep_completed);
        Ok(())
    }

    async fn fail(&self, job: &JobRecord, error: &str) -> Result<RetryDisposition, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        let Some(record) = state.jobs.get_mut(&job.id) else {
            return Err(QueueError::AckFailed(format!("unknown job {}", job.id)));
        };

        record.last_error = Some(error.to_string());

        if record.attempt >= record.max_attempts {
            let mut record = state.jobs.remove(&job.id).unwrap();
            record.state = JobState::Failed;
            record.finished_at = Some(now);
            state.failed.push_front(record);
            state.failed.truncate(self.keep_failed);
            return Ok(RetryDisposition::Exhausted);
        }

        let ready_at = now + record.backoff.delay_after(record.attempt);
        record.state = JobState::Delayed;
        record.ready_at = ready_at;
        record.claimed_at = None;
        state.delayed.push(job.id);
        Ok(RetryDisposition::Retry { ready_at })
    }

    async fn reclaim_stalled(
        &self,
        older_than: std::time::Duration,
    ) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut state = self.state.lock().unwrap();

        let stalled: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Active
                    && job.claimed_at.map_or(false, |claimed| claimed <= cutoff)
            })
            .map(|job| job.id)
            .collect();

        for id in &stalled {
            if let Some(job) = state.jobs.get_mut(id) {
                job.state = JobState::Waiting;
                job.claimed_at = None;
                state.waiting.push_back(*id);
            }
        }

        Ok(stalled.len())
    }

    async fn recent_completed(&self) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.state.lock().unwrap().completed.iter().cloned().collect())
    }

    async fn recent_failed(&self) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.state.lock().unwrap().failed.iter().cloned().collect())
    }
}
