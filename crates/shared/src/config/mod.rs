//! Configuration for the marketplace event bus
//!
//! Configuration is loaded once at startup (`.env` file first, then the
//! process environment), validated fail-fast, and passed down as immutable
//! DTOs.
//!
//! # Usage
//!
//! ```ignore
//! use marketplace_shared::config::ConfigLoader;
//!
//! let config = ConfigLoader::new(None).load_bus_config()?;
//! println!("publisher batch size: {}", config.publisher.batch_size);
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//!
//! - `MARKETPLACE_DATABASE_URL`: PostgreSQL connection string
//! - `MARKETPLACE_NATS_URL`: NATS connection URL(s), comma separated
//!
//! ## Optional
//!
//! - `MARKETPLACE_PUBLISHER_BATCH_SIZE` (100), `_TERMINAL_ATTEMPTS` (5),
//!   `_POLL_INTERVAL_MS` (1000), `_WORKER_COUNT` (1), `_SEND_TIMEOUT_SECS` (10)
//! - `MARKETPLACE_CONSUMERS` (`analytics,notifications`) and
//!   `MARKETPLACE_CONSUMER_<NAME>_ACK_DEADLINE_SECS` (60)
//! - `MARKETPLACE_IDEMPOTENCY_TTL_SECS` (7 days)
//! - `MARKETPLACE_OUTBOX_RETENTION_SECS` (7 days), `_RETENTION_MIN_ATTEMPTS` (0),
//!   `_CLEANUP_INTERVAL_SECS` (3600), `_EVENT_KEY_INDEX` (1)
//! - `MARKETPLACE_LOG_FORMAT`: `pretty` or `json`

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{
    BusConfigDto, ConsumerConfig, DatabaseConfig, IdempotencyConfig, LogFormat, LoggingConfig,
    NatsConfig, OutboxConfig, PublisherConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::{
    validate_bus_config, validate_database_url, validate_idempotency_ttl, validate_nats_urls,
    validate_pool_config,
};
