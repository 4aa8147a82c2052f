//! Shutdown coordination: OS signals or an explicit request

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::debug;

/// Resolves on SIGTERM, SIGINT, or [`ShutdownSignal::trigger`]
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; a later `wait` still observes it
    pub fn trigger(&self) {
        self.requested.notify_one();
    }

    /// Wait for a shutdown signal
    pub async fn wait(&self) -> std::io::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
            _ = self.requested.notified() => {
                debug!("shutdown requested");
            }
        }

        Ok(())
    }
}
