//! Error types for the conversation core
//!
//! Every failure here is local and recoverable. Callers usually turn them
//! into a notification rather than propagating them further.

use thiserror::Error;

/// Failure reported by the capture permission capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone access was refused")]
    Denied,

    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the agent session capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("agent rejected the session: {0}")]
    Rejected(String),

    #[error("no session is open")]
    NotConnected,

    #[error("event queue is full")]
    Backpressure,

    #[error("event queue closed")]
    Closed,

    #[error("operation not supported by this transport")]
    Unsupported,
}

/// Errors surfaced by the permission gate and session controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] CaptureError),

    #[error("connection failed: {0}")]
    ConnectionFailed(TransportError),

    #[error("agent reported an error: {0}")]
    TransportError(String),

    #[error("teardown failed: {0}")]
    TeardownFailed(TransportError),

    #[error("malformed agent message: {0}")]
    MalformedEvent(&'static str),

    #[error("microphone permission has not been granted")]
    PermissionRequired,

    #[error("a session is already active")]
    AlreadyActive,
}

impl SessionError {
    /// Stable machine-readable code, used in IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "permission_denied",
            SessionError::ConnectionFailed(_) => "connection_failed",
            SessionError::TransportError(_) => "transport_error",
            SessionError::TeardownFailed(_) => "teardown_failed",
            SessionError::MalformedEvent(_) => "malformed_event",
            SessionError::PermissionRequired => "permission_required",
            SessionError::AlreadyActive => "already_active",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_converts_to_permission_denied() {
        let err: SessionError = CaptureError::Denied.into();
        assert_eq!(err.code(), "permission_denied");
        assert_eq!(err.to_string(), "permission denied: microphone access was refused");
    }

    #[test]
    fn test_connection_failed_message() {
        let err = SessionError::ConnectionFailed(TransportError::Rejected("busy".into()));
        assert_eq!(err.to_string(), "connection failed: agent rejected the session: busy");
    }
}
