//! Configuration loader
//!
//! Loads the event bus configuration from an optional .env file and the
//! process environment.

use std::path::{Path, PathBuf};

use super::dto::{
    BusConfigDto, ConsumerConfig, DatabaseConfig, IdempotencyConfig, LogFormat, LoggingConfig,
    NatsConfig, OutboxConfig, PublisherConfig, DEFAULT_ACK_DEADLINE_SECS,
};
use super::error::{ConfigError, Result};
use super::validator::validate_bus_config;

const DEFAULT_CONSUMERS: &str = "analytics,notifications";

/// Configuration loader
///
/// Values from the .env file are exported into the process environment
/// before the DTOs are built, so the file acts as a local override.
///
/// # Example
///
/// ```ignore
/// use marketplace_shared::config::ConfigLoader;
/// use std::path::PathBuf;
///
/// let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
/// let config = loader.load_bus_config()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the bus configuration.
    pub fn load_bus_config(&self) -> Result<BusConfigDto> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = BusConfigDto::from_env()?;
        validate_bus_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

/// Source of raw configuration values, keyed by variable name.
trait VarSource {
    fn get(&self, var: &str) -> Option<String>;
}

struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn get(&self, var: &str) -> Option<String> {
        std::env::var(var).ok()
    }
}

impl<F> VarSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        self(var)
    }
}

impl BusConfigDto {
    /// Build the configuration from environment variables.
    ///
    /// # Required Variables
    ///
    /// - `MARKETPLACE_DATABASE_URL`
    /// - `MARKETPLACE_NATS_URL` (comma separated for clusters)
    pub fn from_env() -> Result<Self> {
        Self::from_source(&ProcessEnv)
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_source(&lookup)
    }

    fn from_source(src: &dyn VarSource) -> Result<Self> {
        Ok(Self {
            database: database_config(src)?,
            nats: nats_config(src)?,
            publisher: publisher_config(src)?,
            consumers: consumer_configs(src)?,
            idempotency: IdempotencyConfig {
                ttl_secs: parse_optional_var(
                    src,
                    "MARKETPLACE_IDEMPOTENCY_TTL_SECS",
                    IdempotencyConfig::default().ttl_secs,
                )?,
            },
            outbox: outbox_config(src)?,
            logging: LoggingConfig {
                format: parse_optional_var(src, "MARKETPLACE_LOG_FORMAT", LogFormat::Pretty)?,
            },
        })
    }
}

fn database_config(src: &dyn VarSource) -> Result<DatabaseConfig> {
    Ok(DatabaseConfig {
        url: required_var(src, "MARKETPLACE_DATABASE_URL")?,
        pool_size: parse_optional_var(src, "MARKETPLACE_DB_POOL_SIZE", 20)?,
        min_idle: parse_optional_var(src, "MARKETPLACE_DB_MIN_IDLE", 2)?,
        connect_timeout_secs: parse_optional_var(src, "MARKETPLACE_DB_CONNECT_TIMEOUT_SECS", 30)?,
    })
}

fn nats_config(src: &dyn VarSource) -> Result<NatsConfig> {
    let urls = split_list(&required_var(src, "MARKETPLACE_NATS_URL")?);
    Ok(NatsConfig {
        urls,
        timeout_secs: parse_optional_var(src, "MARKETPLACE_NATS_TIMEOUT_SECS", 10)?,
    })
}

fn publisher_config(src: &dyn VarSource) -> Result<PublisherConfig> {
    let defaults = PublisherConfig::default();
    Ok(PublisherConfig {
        batch_size: parse_optional_var(src, "MARKETPLACE_PUBLISHER_BATCH_SIZE", defaults.batch_size)?,
        terminal_attempts: parse_optional_var(
            src,
            "MARKETPLACE_PUBLISHER_TERMINAL_ATTEMPTS",
            defaults.terminal_attempts,
        )?,
        poll_interval_ms: parse_optional_var(
            src,
            "MARKETPLACE_PUBLISHER_POLL_INTERVAL_MS",
            defaults.poll_interval_ms,
        )?,
        worker_count: parse_optional_var(
            src,
            "MARKETPLACE_PUBLISHER_WORKER_COUNT",
            defaults.worker_count,
        )?,
        send_timeout_secs: parse_optional_var(
            src,
            "MARKETPLACE_PUBLISHER_SEND_TIMEOUT_SECS",
            defaults.send_timeout_secs,
        )?,
    })
}

fn consumer_configs(src: &dyn VarSource) -> Result<Vec<ConsumerConfig>> {
    let names = src
        .get("MARKETPLACE_CONSUMERS")
        .unwrap_or_else(|| DEFAULT_CONSUMERS.to_string());

    split_list(&names)
        .into_iter()
        .map(|name| {
            let var = format!(
                "MARKETPLACE_CONSUMER_{}_ACK_DEADLINE_SECS",
                name.to_ascii_uppercase().replace('-', "_")
            );
            let ack_deadline_secs = parse_optional_var(src, &var, DEFAULT_ACK_DEADLINE_SECS)?;
            Ok(ConsumerConfig {
                name,
                ack_deadline_secs,
            })
        })
        .collect()
}

fn outbox_config(src: &dyn VarSource) -> Result<OutboxConfig> {
    let defaults = OutboxConfig::default();
    Ok(OutboxConfig {
        retention_secs: parse_optional_var(
            src,
            "MARKETPLACE_OUTBOX_RETENTION_SECS",
            defaults.retention_secs,
        )?,
        retention_min_attempts: parse_optional_var(
            src,
            "MARKETPLACE_OUTBOX_RETENTION_MIN_ATTEMPTS",
            defaults.retention_min_attempts,
        )?,
        cleanup_interval_secs: parse_optional_var(
            src,
            "MARKETPLACE_OUTBOX_CLEANUP_INTERVAL_SECS",
            defaults.cleanup_interval_secs,
        )?,
        event_key_index: parse_bool_var(
            src,
            "MARKETPLACE_OUTBOX_EVENT_KEY_INDEX",
            defaults.event_key_index,
        )?,
    })
}

fn required_var(src: &dyn VarSource, var: &str) -> Result<String> {
    match src.get(var) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingRequired {
            var: var.to_string(),
        }),
    }
}

/// Parse an optional variable. Unset falls back to `default`, a value that
/// does not parse is an error rather than a silent default.
fn parse_optional_var<T>(src: &dyn VarSource, var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match src.get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn parse_bool_var(src: &dyn VarSource, var: &str, default: bool) -> Result<bool> {
    match src.get(var).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: other.to_string(),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
