// PostgreSQL connection pool

use crate::config::DatabaseConfig;
use crate::errors::StoreError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument};

/// Postgres connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Create a new connection pool from configuration
    #[instrument(skip(config))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            "Initializing database connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!("Database connection pool initialized");
        Ok(Self { pool })
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Verify the database connection is working
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    #[ignore] // Requires Postgres to be running
    async fn test_pool_creation_and_health_check() {
        let settings = Settings::default();
        let pool = DbPool::new(&settings.database).await.unwrap();
        assert!(pool.health_check().await.is_ok());
    }
}
