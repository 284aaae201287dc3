// Configuration management with layered sources (defaults, file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub backup: BackupConfig,
    pub handlers: HandlerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis key prefix for all queue structures.
    pub key_prefix: String,
    /// Total delivery attempts per job before it is terminally failed.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// How many completed job records to retain.
    pub keep_completed: usize,
    /// How many terminally failed job records to retain.
    pub keep_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock tick interval for the due-task scan, in seconds.
    pub tick_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent dispatcher loops.
    pub concurrency: u32,
    /// Sleep between claim attempts when the queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Active jobs claimed longer than this ago are re-queued.
    pub stalled_after_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub cron: String,
    pub directory: String,
    pub pg_dump_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Callback endpoint per automation kind, keyed by task-type name.
    pub endpoints: HashMap<String, String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            // Committed base configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.redis.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.queue.max_attempts == 0 {
            return Err("Queue max_attempts must be greater than 0".to_string());
        }
        if self.queue.keep_completed == 0 || self.queue.keep_failed == 0 {
            return Err("Queue retention caps must be greater than 0".to_string());
        }
        if self.scheduler.tick_interval_seconds == 0 {
            return Err("Scheduler tick_interval_seconds must be greater than 0".to_string());
        }
        if self.worker.concurrency == 0 {
            return Err("Worker concurrency must be greater than 0".to_string());
        }
        crate::schedule::validate(&self.backup.cron)
            .map_err(|e| format!("Invalid backup cron: {e}"))?;

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/bizvibe".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            queue: QueueConfig {
                key_prefix: "automation".to_string(),
                max_attempts: 3,
                backoff_base_ms: 60_000,
                keep_completed: 50,
                keep_failed: 100,
            },
            scheduler: SchedulerConfig {
                tick_interval_seconds: 60,
            },
            worker: WorkerConfig {
                concurrency: 4,
                poll_interval_ms: 1_000,
                stalled_after_seconds: 300,
            },
            backup: BackupConfig {
                cron: "0 2 * * *".to_string(),
                directory: "./backups".to_string(),
                pg_dump_path: "pg_dump".to_string(),
            },
            handlers: HandlerConfig {
                endpoints: HashMap::new(),
                request_timeout_seconds: 30,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
            },
        }
    }
}
