//! PostgreSQL connection pool
//!
//! One pool is created in the binary and shared by every adapter.
//!
//! ```ignore
//! use marketplace_server_infrastructure::persistence::postgres::{DatabasePool, DatabasePoolConfig};
//!
//! let pool = DatabasePool::new(&config.database.url, DatabasePoolConfig::from(&config.database)).await?;
//! let outbox = PostgresOutboxStore::new(pool.pg_pool());
//! ```

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use marketplace_shared::config::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Connection acquisition timeout
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            max_lifetime: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl DatabasePoolConfig {
    #[inline]
    pub fn new(max_connections: u32, min_connections: u32, connection_timeout_secs: u64) -> Self {
        Self {
            max_connections,
            min_connections,
            connection_timeout: Duration::from_secs(connection_timeout_secs),
            ..Default::default()
        }
    }
}

impl From<&DatabaseConfig> for DatabasePoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self::new(
            config.pool_size,
            config.min_idle,
            config.connect_timeout_secs,
        )
    }
}

#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect a new pool
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the database is unreachable.
    pub async fn new(url: &str, config: DatabasePoolConfig) -> Result<Self, PoolError> {
        info!(
            min = config.min_connections,
            max = config.max_connections,
            timeout = ?config.connection_timeout,
            "Creating PostgreSQL pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(url)
            .await
            .map_err(|e| PoolError::ConnectionFailed(e.to_string()))?;

        info!("PostgreSQL pool created");
        Ok(Self { pool })
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub fn pg_pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),
}
