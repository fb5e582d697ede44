//! Signal handling for graceful shutdown.

use tracing::{info, warn};

async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

/// Wait for SIGINT or SIGTERM. If one handler cannot be installed the
/// other is still awaited.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt() => {
            info!(signal = "SIGINT", "signal received");
        }
        _ = terminate => {
            info!(signal = "SIGTERM", "signal received");
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    interrupt().await;
    info!(signal = "ctrl-c", "signal received");
}
