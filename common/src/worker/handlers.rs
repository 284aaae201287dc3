// Shipped job handlers
//
// Automation domain logic (rank refresh, review outreach, suggestion and
// report generation) lives in internal services the worker reaches over
// HTTP; each business-scoped job kind gets a callback handler pointed at the
// service endpoint configured for it. The backup kind runs in-process
// through the backup cycle.

use crate::backup::BackupCycle;
use crate::config::HandlerConfig;
use crate::models::TaskType;
use crate::worker::dispatcher::{HandlerRegistry, JobContext, JobHandler};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Handler that forwards a job to an internal service endpoint.
///
/// The callback POST body is the handler contract: the owning business id
/// and the task's opaque payload. Duplicate deliveries reach the service
/// as duplicate POSTs; dedupe is the service's responsibility.
pub struct HttpCallbackHandler {
    client: Client,
    endpoint: String,
}

impl HttpCallbackHandler {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl JobHandler for HttpCallbackHandler {
    async fn handle(&self, ctx: JobContext) -> anyhow::Result<()> {
        debug!(endpoint = %self.endpoint, "Invoking automation callback");

        let body = json!({
            "businessId": ctx.business_id,
            "payload": ctx.payload,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("callback request failed: {e}"))?;

        response
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("callback returned error status: {e}"))?;

        Ok(())
    }
}

/// Handler for the global backup job: defers to the backup cycle's own
/// due-check, so a manually triggered backup that is not due yet is a no-op
/// rather than an extra dump.
pub struct BackupHandler {
    cycle: Arc<BackupCycle>,
}

impl BackupHandler {
    pub fn new(cycle: Arc<BackupCycle>) -> Self {
        Self { cycle }
    }
}

#[async_trait]
impl JobHandler for BackupHandler {
    async fn handle(&self, _ctx: JobContext) -> anyhow::Result<()> {
        self.cycle.run_if_due().await?;
        Ok(())
    }
}

/// Build the worker's registry from configuration: one HTTP callback per
/// configured business-scoped kind, plus the in-process backup handler.
/// Kinds without an endpoint stay unregistered and their jobs are dropped
/// with a warning at dispatch.
pub fn registry_from_config(
    config: &HandlerConfig,
    backup: Option<Arc<BackupCycle>>,
) -> anyhow::Result<HandlerRegistry> {
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let mut registry = HandlerRegistry::new();

    for kind in TaskType::ALL {
        if kind == TaskType::Backup {
            continue;
        }
        match config.endpoints.get(kind.as_str()) {
            Some(endpoint) => {
                let handler = HttpCallbackHandler::new(endpoint, timeout)?;
                registry = registry.register(kind, Arc::new(handler));
            }
            None => {
                warn!(task_type = %kind, "No callback endpoint configured; jobs of this kind will be dropped");
            }
        }
    }

    if let Some(cycle) = backup {
        registry = registry.register(TaskType::Backup, Arc::new(BackupHandler::new(cycle)));
    }

    Ok(registry)
}
