//! Marketplace event bus server
//!
//! Runs the outbox publishers, the downstream consumers and the retention
//! sweeps against PostgreSQL and NATS JetStream.

mod startup;

use std::path::PathBuf;

use clap::Parser;
use marketplace_shared::config::{ConfigLoader, LogFormat};

/// CLI arguments for marketplace-server
#[derive(clap::Parser, Debug)]
#[command(name = "marketplace-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Marketplace transactional outbox event bus", long_about = None)]
struct Args {
    /// Optional .env file loaded before the process environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(args.env_file).load_bus_config()?;
    setup_logging(config.logging.format, args.debug)?;

    let running = startup::run(config).await?;
    startup::shutdown::wait_for_signal().await;
    running.shutdown().await;

    Ok(())
}

fn setup_logging(format: LogFormat, debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = fmt().with_env_filter(env_filter).with_target(true);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}
