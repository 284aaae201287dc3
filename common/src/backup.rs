// Singleton backup cycle
//
// The backup schedule is a single fixed cron expression with the same
// due/advance semantics as automation tasks, but its state lives in a JSON
// file next to the dumps rather than in the primary datastore, and the run
// happens synchronously inside the scheduler tick instead of going through
// the queue.

use crate::clock::Clock;
use crate::config::BackupConfig;
pub use crate::errors::BackupError;
use crate::models::BackupState;
use crate::schedule::CronSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, instrument};

const STATE_FILE: &str = "backup-state.json";

/// Executes one database backup. The cycle decides *when*; the runner only
/// knows *how*.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run_backup(&self) -> Result<PathBuf, BackupError>;
}

/// Outcome of a due-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Not due yet; nothing ran.
    Scheduled { next_run: DateTime<Utc> },
    /// A backup ran and the schedule advanced.
    Completed { next_run: DateTime<Utc> },
}

/// Due-gated backup driver.
pub struct BackupCycle {
    spec: CronSpec,
    directory: PathBuf,
    runner: Arc<dyn BackupRunner>,
    clock: Arc<dyn Clock>,
}

impl BackupCycle {
    pub fn new(
        config: &BackupConfig,
        runner: Arc<dyn BackupRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BackupError> {
        let spec = CronSpec::parse(&config.cron)?;
        Ok(Self {
            spec,
            directory: PathBuf::from(&config.directory),
            runner,
            clock,
        })
    }

    fn state_path(&self) -> PathBuf {
        self.directory.join(STATE_FILE)
    }

    async fn read_state(&self) -> Result<BackupState, BackupError> {
        let path = self.state_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BackupError::StateCorrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackupState::default()),
            Err(e) => Err(BackupError::StateIo(format!("{}: {e}", path.display()))),
        }
    }

    async fn write_state(&self, state: &BackupState) -> Result<(), BackupError> {
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| BackupError::StateIo(e.to_string()))?;
        tokio::fs::write(self.state_path(), body)
            .await
            .map_err(|e| BackupError::StateIo(e.to_string()))
    }

    /// Run the backup if its next occurrence has arrived, advancing the
    /// schedule afterwards. On first contact (no state file) the schedule is
    /// initialized without running.
    #[instrument(skip(self))]
    pub async fn run_if_due(&self) -> Result<BackupOutcome, BackupError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| BackupError::StateIo(e.to_string()))?;

        let now = self.clock.now();
        let state = self.read_state().await?;

        let Some(next_run) = state.next_run else {
            let next_run = self.spec.next_occurrence(now)?;
            self.write_state(&BackupState {
                last_run: state.last_run,
                next_run: Some(next_run),
            })
            .await?;
            info!(next_run = %next_run, "Backup schedule initialized");
            return Ok(BackupOutcome::Scheduled { next_run });
        };

        if now < next_run {
            return Ok(BackupOutcome::Scheduled { next_run });
        }

        let artifact = self.runner.run_backup().await?;
        let next_run = self.spec.next_occurrence(now)?;
        self.write_state(&BackupState {
            last_run: Some(now),
            next_run: Some(next_run),
        })
        .await?;

        info!(artifact = %artifact.display(), next_run = %next_run, "Backup completed");
        Ok(BackupOutcome::Completed { next_run })
    }
}

/// Backup runner that shells out to `pg_dump`.
pub struct PgDumpRunner {
    pg_dump_path: String,
    database_url: String,
    directory: PathBuf,
    clock: Arc<dyn Clock>,
}

impl PgDumpRunner {
    pub fn new(config: &BackupConfig, database_url: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            pg_dump_path: config.pg_dump_path.clone(),
            database_url: database_url.to_string(),
            directory: PathBuf::from(&config.directory),
            clock,
        }
    }

    fn artifact_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y-%m-%dT%H-%M-%S");
        self.directory.join(format!("bizvibe-{stamp}.sql"))
    }
}

#[async_trait]
impl BackupRunner for PgDumpRunner {
    async fn run_backup(&self) -> Result<PathBuf, BackupError> {
        let output_path = self.artifact_path(self.clock.now());

        let output = Command::new(&self.pg_dump_path)
            .arg(&self.database_url)
            .arg("--file")
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| BackupError::CommandFailed(format!("{}: {e}", self.pg_dump_path)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::CommandFailed(format!(
                "pg_dump exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output_path)
    }
}

impl std::fmt::Debug for BackupCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCycle")
            .field("cron", &self.spec.expression())
            .field("directory", &self.directory)
            .finish()
    }
}
