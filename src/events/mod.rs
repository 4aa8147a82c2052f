//! Events module for the conversation core
//!
//! Inbound events come from the agent transport as one typed sum delivered
//! over a single ordered queue. Outbound events describe state changes and
//! are broadcast to IPC subscribers.

use serde::{Deserialize, Serialize};

use crate::notify::Notice;
use crate::permission::PermissionState;
use crate::session::{Role, SessionStatus, Turn};

/// Events emitted by the agent session transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The agent accepted the session
    Connected,

    /// The agent closed the session
    Disconnected,

    /// An utterance from either side; fragments may lack role or content
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },

    /// The transport reported a problem; not necessarily fatal
    Error { details: String },

    /// The agent started or stopped speaking
    SpeakingChanged { is_speaking: bool },
}

impl AgentEvent {
    /// Convenience constructor for a finalized message
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        AgentEvent::Message {
            role: Some(role.as_str().to_string()),
            content: Some(content.into()),
        }
    }
}

impl std::fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentEvent::Connected => write!(f, "CONNECTED"),
            AgentEvent::Disconnected => write!(f, "DISCONNECTED"),
            AgentEvent::Message { role, content } => write!(
                f,
                "MESSAGE (role={}, {} chars)",
                role.as_deref().unwrap_or("-"),
                content.as_ref().map(|c| c.chars().count()).unwrap_or(0)
            ),
            AgentEvent::Error { details } => write!(f, "ERROR ({})", details),
            AgentEvent::SpeakingChanged { is_speaking } => {
                write!(f, "SPEAKING_CHANGED ({})", is_speaking)
            }
        }
    }
}

/// State changes published by the conversation core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Microphone permission changed
    PermissionChanged { state: PermissionState },

    /// Session lifecycle moved to a new status
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A turn was appended to the transcript
    TurnAppended { turn: Turn },

    /// The agent started or stopped speaking
    SpeakingChanged { is_speaking: bool },

    /// A user-facing notification
    Notice(Notice),
}
