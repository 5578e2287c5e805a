//! Signal handling for graceful shutdown.

use crate::error::ServerError;
use tokio::signal;
use tracing::info;

/// Returns once a termination signal arrives.
///
/// Listens for SIGINT and SIGTERM on Unix and Ctrl+C on Windows.
pub async fn setup_signal_handlers() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(signal_error)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(signal_error)?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.map_err(signal_error)?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

fn signal_error(e: std::io::Error) -> ServerError {
    ServerError::Internal(format!("Failed to install signal handler: {e}"))
}
