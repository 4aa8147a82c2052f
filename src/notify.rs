//! Notification capability
//!
//! The core never renders anything itself. It hands notices to an injected
//! [`Notifier`], which decides how the user sees them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::events::SessionEvent;

/// How prominently a notice should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notice {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }
}

/// Fire-and-forget sink for user-facing notices
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Logs notices and pushes them to IPC subscribers
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastNotifier {
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self { event_tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Info | Severity::Success => {
                info!(title = %notice.title, description = %notice.description, "notice")
            }
            Severity::Warning => {
                warn!(title = %notice.title, description = %notice.description, "notice")
            }
            Severity::Error => {
                error!(title = %notice.title, description = %notice.description, "notice")
            }
        }

        // No subscribers is fine
        let _ = self.event_tx.send(SessionEvent::Notice(notice));
    }
}
