//! Permission gate for microphone access
//!
//! A session may only be started once the gate reports `Granted`.
//! - Unrequested: initial state, nothing asked yet
//! - Granted: capture capability succeeded
//! - Denied: capture refused or device missing, user may ask again

mod capture;
mod gate;

pub use capture::{CapturePermission, DeviceCapture};
pub use gate::{PermissionGate, PermissionState};

#[cfg(test)]
pub(crate) use capture::testing;
