//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::conversation::SessionSnapshot;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::permission::PermissionState;
use crate::session::{Indicator, SessionStatus, Turn};

/// Largest frame body accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current session status
    GetStatus,

    /// Request every turn recorded so far
    GetTranscript,

    /// Ask for microphone access
    RequestPermission,

    /// Open a session with the configured agent
    StartSession,

    /// Close the current session
    EndSession,

    /// Send typed text in place of speech
    Say { text: String },

    /// Subscribe to pushed session events
    Subscribe,

    /// Stop the daemon
    Shutdown,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current session status
    Status(StatusReport),

    /// Full transcript
    Transcript { turns: Vec<Turn> },

    /// Permission state after a request
    Permission { state: PermissionState },

    /// Request accepted
    Ok,

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: SessionEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<SessionError> for Response {
    fn from(err: SessionError) -> Self {
        Response::error(err.code(), err.to_string())
    }
}

/// Session status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Daemon version
    pub version: String,

    pub permission: PermissionState,

    pub status: SessionStatus,

    /// Speaking or listening, only while connected
    pub indicator: Option<Indicator>,

    /// Number of turns in the transcript
    pub turns: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl StatusReport {
    pub fn new(snapshot: &SessionSnapshot, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            permission: snapshot.permission,
            status: snapshot.status,
            indicator: snapshot.indicator,
            turns: snapshot.turns.len(),
            uptime_secs,
        }
    }
}
