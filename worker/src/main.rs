// Worker binary entry point

use anyhow::{Context, Result};
use common::backup::{BackupCycle, PgDumpRunner};
use common::clock::SystemClock;
use common::config::Settings;
use common::db::RedisPool;
use common::queue::RedisJobQueue;
use common::telemetry;
use common::worker::{registry_from_config, Dispatcher, DispatcherConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting BizVibe automation worker");

    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis connection");
        anyhow::anyhow!("Redis initialization error: {e}")
    })?;

    let clock = Arc::new(SystemClock);
    let queue = Arc::new(RedisJobQueue::new(redis_pool, &settings.queue));

    // The backup job kind runs in-process; everything business-scoped goes
    // out to the configured callback endpoints.
    let backup_runner = Arc::new(PgDumpRunner::new(
        &settings.backup,
        &settings.database.url,
        clock.clone(),
    ));
    let backup = Arc::new(
        BackupCycle::new(&settings.backup, backup_runner, clock.clone())
            .map_err(|e| anyhow::anyhow!("Backup cycle initialization error: {e}"))?,
    );

    let registry = Arc::new(registry_from_config(&settings.handlers, Some(backup))?);
    info!(handlers = registry.len(), "Handler registry built");

    let dispatcher_config = DispatcherConfig {
        poll_interval: Duration::from_millis(settings.worker.poll_interval_ms),
        stalled_after: Duration::from_secs(settings.worker.stalled_after_seconds),
    };

    let mut dispatchers = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..settings.worker.concurrency {
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            registry.clone(),
            dispatcher_config.clone(),
        ));
        let runner = dispatcher.clone();
        handles.push(tokio::spawn(async move { runner.run().await }));
        dispatchers.push(dispatcher);
    }

    info!(
        concurrency = settings.worker.concurrency,
        "Worker is running. Press Ctrl+C to shutdown gracefully"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    for dispatcher in &dispatchers {
        dispatcher.shutdown();
    }
    for handle in handles {
        let _ = handle.await;
    }

    info!("Worker shutdown complete");
    Ok(())
}
