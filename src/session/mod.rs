//! Session module for conversation lifecycle and transcript
//!
//! Status values:
//! - Idle: no session has been started
//! - Connecting: start requested, waiting for the agent
//! - Connected: agent accepted, speaking indicator is meaningful
//! - Ended: torn down locally or by the agent
//! - Errored: the agent reported an error, lifecycle events still apply

mod controller;
mod transcript;

pub use controller::{Indicator, SessionController, SessionStatus, StartOutcome};
pub use transcript::{Role, Turn};
