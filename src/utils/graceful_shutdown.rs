use std::sync::Arc;

use parking_lot::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

/// Process-wide shutdown coordinator.
///
/// Every long-lived task (HTTP server, prober worker) holds a child of the
/// root [`CancellationToken`]; the first signal or manual trigger cancels the
/// root and records why.
#[derive(Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock()
    }

    /// Start shutdown. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
            return;
        }
        *slot = Some(reason);
        drop(slot);

        tracing::info!("Initiating graceful shutdown: {:?}", reason);
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown. Returns early if
    /// shutdown was triggered some other way.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = self.token.cancelled() => {}
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        tracing::info!("Received SIGINT (Ctrl+C)");
                        self.trigger_shutdown(ShutdownReason::Interrupt);
                    }
                    Err(e) => tracing::error!("Cannot listen for Ctrl+C: {}", e),
                }
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }
    }

    /// Resolves once shutdown has been initiated. Suitable for
    /// `axum::serve(..).with_graceful_shutdown`.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}
