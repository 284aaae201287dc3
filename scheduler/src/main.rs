// Scheduler binary entry point

use anyhow::{Context, Result};
use common::backup::{BackupCycle, PgDumpRunner};
use common::clock::SystemClock;
use common::config::Settings;
use common::db::{DbPool, RedisPool};
use common::queue::{BackoffPolicy, EnqueueOptions, RedisJobQueue};
use common::scheduler::{SchedulerConfig, SchedulerEngine};
use common::store::PgTaskStore;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; its log level seeds the subscriber.
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting BizVibe automation scheduler");

    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!("Database initialization error: {e}")
    })?;

    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis connection");
        anyhow::anyhow!("Redis initialization error: {e}")
    })?;

    let clock = Arc::new(SystemClock);
    let store = Arc::new(PgTaskStore::new(db_pool));
    let queue = Arc::new(RedisJobQueue::new(redis_pool, &settings.queue));

    let backup_runner = Arc::new(PgDumpRunner::new(
        &settings.backup,
        &settings.database.url,
        clock.clone(),
    ));
    let backup = Arc::new(
        BackupCycle::new(&settings.backup, backup_runner, clock.clone())
            .map_err(|e| anyhow::anyhow!("Backup cycle initialization error: {e}"))?,
    );

    let scheduler_config = SchedulerConfig {
        tick_interval_seconds: settings.scheduler.tick_interval_seconds,
        enqueue_options: EnqueueOptions {
            max_attempts: settings.queue.max_attempts,
            backoff: BackoffPolicy {
                base_delay_ms: settings.queue.backoff_base_ms,
            },
        },
    };

    let engine = Arc::new(SchedulerEngine::new(
        scheduler_config,
        store,
        queue,
        Some(backup),
        clock,
    ));

    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received, stopping scheduler");
        engine_for_shutdown.stop();
    });

    engine.start().await;

    info!("Scheduler shutdown complete");
    Ok(())
}
