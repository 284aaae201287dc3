// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("No future occurrence for cron expression '{expression}'")]
    NoNextOccurrence { expression: String },
}

/// Task store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid task row: {0}")]
    InvalidRow(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to enqueue job: {0}")]
    EnqueueFailed(String),

    #[error("Failed to claim job: {0}")]
    ClaimFailed(String),

    #[error("Failed to acknowledge job: {0}")]
    AckFailed(String),

    #[error("Job serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Job deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Errors from control-surface operations that touch both store and queue
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Backup cycle errors
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup state I/O failed: {0}")]
    StateIo(String),

    #[error("Backup state is corrupt: {0}")]
    StateCorrupt(String),

    #[error("Backup command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::ConnectionFailed(err.to_string())
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::ClaimFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * *".to_string(),
            reason: "expected 5 fields".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
        assert!(err.to_string().contains("* * *"));
    }

    #[test]
    fn test_store_error_wraps_schedule_error() {
        let err: StoreError = ScheduleError::NoNextOccurrence {
            expression: "0 6 * * *".to_string(),
        }
        .into();
        assert!(err.to_string().contains("No future occurrence"));
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
