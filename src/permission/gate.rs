//! Permission gate state and transitions

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CaptureError, SessionError};
use crate::notify::{Notice, Notifier, Severity};

use super::capture::CapturePermission;

/// Whether the user has granted microphone access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Unrequested,
    Granted,
    Denied,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Unrequested => write!(f, "Unrequested"),
            PermissionState::Granted => write!(f, "Granted"),
            PermissionState::Denied => write!(f, "Denied"),
        }
    }
}

/// Mediates access to the capture device
pub struct PermissionGate {
    state: PermissionState,
    capture: Arc<dyn CapturePermission>,
    notifier: Arc<dyn Notifier>,
}

impl PermissionGate {
    pub fn new(capture: Arc<dyn CapturePermission>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: PermissionState::Unrequested,
            capture,
            notifier,
        }
    }

    /// Get the current permission state
    pub fn state(&self) -> PermissionState {
        self.state
    }

    pub fn is_granted(&self) -> bool {
        self.state == PermissionState::Granted
    }

    /// The capability to ask; its answer goes to [`Self::record_outcome`]
    pub fn capture(&self) -> Arc<dyn CapturePermission> {
        Arc::clone(&self.capture)
    }

    /// Apply the answer to a capture request.
    ///
    /// Never fails: the outcome is reported through a notice and the
    /// returned state. Denial can be retried by asking again.
    pub fn record_outcome(&mut self, result: Result<(), CaptureError>) -> PermissionState {
        let previous = self.state;

        match result {
            Ok(()) => {
                self.state = PermissionState::Granted;
                info!(from = %previous, "microphone permission granted");
                self.notifier.notify(Notice::new(
                    "Microphone access granted",
                    "You can now start a conversation.",
                    Severity::Success,
                ));
            }
            Err(e) => {
                self.state = PermissionState::Denied;
                let err = SessionError::from(e);
                warn!(from = %previous, error = %err, "microphone permission denied");
                self.notifier.notify(Notice::new(
                    "Microphone access denied",
                    err.to_string(),
                    Severity::Error,
                ));
            }
        }

        self.state
    }
}
