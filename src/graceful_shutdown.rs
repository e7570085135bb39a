//! # Graceful Shutdown
//!
//! Signal handling for the server binary. The HTTP server stops accepting
//! connections when a signal arrives; the caller then drains the worker pool.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve on SIGINT, SIGTERM or SIGQUIT (SIGINT only off unix).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let (mut sigterm, mut sigquit) = match (
            unix_signal(SignalKind::terminate()),
            unix_signal(SignalKind::quit()),
        ) {
            (Ok(term), Ok(quit)) => (term, quit),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers; falling back to Ctrl+C");
                ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c() => {}
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigquit.recv() => info!("Received SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT (Ctrl+C)"),
        Err(e) => {
            // Without a handler the process can only be killed; park forever.
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `token` once a shutdown signal arrives.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown initiated");
        token.cancel();
    });
}
