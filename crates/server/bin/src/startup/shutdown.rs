//! Signal handling and task draining

use std::time::Duration;

use futures::future::join_all as join_handles;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How long cancelled tasks get to finish their current batch or delivery
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for SIGINT, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Await every task, giving up after `limit`. Leased outbox rows of a task
/// that is abandoned here are released when its connection drops.
pub async fn join_all(tasks: Vec<(String, JoinHandle<()>)>, limit: Duration) {
    let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) = tasks.into_iter().unzip();

    match timeout(limit, join_handles(handles)).await {
        Ok(results) => {
            for (name, result) in names.iter().zip(results) {
                if let Err(e) = result {
                    warn!(task = %name, error = %e, "Task ended abnormally");
                }
            }
        }
        Err(_) => {
            warn!(timeout = ?limit, "Tasks did not stop in time, exiting anyway");
        }
    }
}
