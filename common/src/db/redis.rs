// Redis connection management

use crate::config::RedisConfig;
use crate::errors::QueueError;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

/// Redis connection wrapper backed by a reconnecting connection manager
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    /// Create a new Redis connection
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn new(config: &RedisConfig) -> Result<Self, QueueError> {
        info!("Initializing Redis connection");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            QueueError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            QueueError::Connection(format!("Failed to create connection manager: {}", e))
        })?;

        info!("Redis connection initialized");
        Ok(Self { manager })
    }

    /// Get a handle to the shared connection
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Verify the Redis connection is working
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Connection(format!("Health check failed: {}", e)))?;

        if response != "PONG" {
            return Err(QueueError::Connection(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(())
    }
}
