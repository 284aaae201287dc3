// Structured logging and Prometheus metrics bootstrap

use anyhow::Result;
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured JSON logging.
///
/// `RUST_LOG` takes precedence over the configured level. Binaries call this
/// once at startup; library code only emits through the `tracing` macros.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus exporter and describe the series this crate emits.
pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "automation_ticks_total",
        Unit::Count,
        "Scheduler ticks executed"
    );
    describe_counter!(
        "automation_ticks_skipped_total",
        Unit::Count,
        "Scheduler ticks skipped because a tick was still running"
    );
    describe_counter!(
        "automation_scan_failures_total",
        Unit::Count,
        "Due-task scans that failed"
    );
    describe_counter!(
        "automation_jobs_enqueued_total",
        Unit::Count,
        "Jobs enqueued by the scheduler"
    );
    describe_counter!(
        "automation_task_errors_total",
        Unit::Count,
        "Per-task enqueue/advance failures"
    );
    describe_counter!(
        "automation_jobs_completed_total",
        Unit::Count,
        "Jobs acknowledged as completed"
    );
    describe_counter!(
        "automation_jobs_retried_total",
        Unit::Count,
        "Job attempts that failed and were scheduled for retry"
    );
    describe_counter!(
        "automation_jobs_failed_total",
        Unit::Count,
        "Jobs that exhausted their attempts"
    );
    describe_counter!(
        "automation_jobs_dropped_total",
        Unit::Count,
        "Jobs dropped because their name had no registered handler"
    );
    describe_histogram!(
        "automation_tick_duration_seconds",
        Unit::Seconds,
        "Wall-clock duration of a scheduler tick"
    );

    tracing::info!(port = port, "Prometheus metrics exporter installed");
    Ok(())
}
