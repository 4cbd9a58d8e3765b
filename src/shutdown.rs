//! Process signal handling for graceful node shutdown.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Translates SIGTERM / SIGINT into the node's cancellation token.
///
/// Every worker loop selects on the token, so one signal drains the whole
/// node within a loop iteration plus one receive timeout. In-flight
/// bundles on the wire are abandoned; deduplication protects against late
/// re-delivery after a restart.
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Install the signal listeners.
    ///
    /// Returns an error if signal registration with the runtime fails.
    pub fn install() -> std::io::Result<Self> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                }
            }
            trigger.cancel();
        });
        Ok(ShutdownSignal { token })
    }

    /// Token to hand to subsystems that should stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait until a shutdown signal arrives.
    pub async fn recv(&self) {
        self.token.cancelled().await;
    }
}
