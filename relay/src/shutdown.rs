use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::drain::DrainTracker;

/// Stops the listeners when the shutdown signal arrives, then gives in-flight
/// uploads a bounded amount of time to finish. Uploads are never cancelled
/// from here; once the drain window is over the process simply exits.
pub struct ShutdownOrchestrator {
    stop_accepting: CancellationToken,
    drain: DrainTracker,
    timeout: Duration,
}

impl ShutdownOrchestrator {
    pub fn new(stop_accepting: CancellationToken, drain: DrainTracker, timeout: Duration) -> Self {
        Self {
            stop_accepting,
            drain,
            timeout,
        }
    }

    /// Returns `true` if every in-flight upload finished within the timeout.
    pub async fn run(self, signal: impl Future<Output = ()>) -> bool {
        signal.await;

        tracing::info!(
            in_flight = self.drain.in_flight(),
            "shutdown requested, no longer accepting uploads"
        );
        self.stop_accepting.cancel();

        let drained = self.drain.wait_for_quiescence(self.timeout).await;
        if drained {
            tracing::info!("all uploads finished");
        } else {
            tracing::warn!(
                in_flight = self.drain.in_flight(),
                timeout_secs = self.timeout.as_secs(),
                "shutdown timeout reached with uploads still in flight"
            );
        }
        drained
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
