//! Audio capture permission capability

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::CaptureError;

/// Asks the platform for permission to capture audio
#[async_trait]
pub trait CapturePermission: Send + Sync {
    async fn request_audio_capture(&self) -> Result<(), CaptureError>;
}

/// Treats a readable capture device node as granted access
pub struct DeviceCapture {
    device: PathBuf,
}

impl DeviceCapture {
    pub fn new(device: &Path) -> Self {
        Self {
            device: device.to_owned(),
        }
    }
}

#[async_trait]
impl CapturePermission for DeviceCapture {
    async fn request_audio_capture(&self) -> Result<(), CaptureError> {
        let metadata = tokio::fs::metadata(&self.device)
            .await
            .map_err(|e| map_io_error(&self.device, e))?;

        // Sound devices on Linux live in a directory, other platforms may expose a node
        if metadata.is_dir() {
            let _entries = tokio::fs::read_dir(&self.device)
                .await
                .map_err(|e| map_io_error(&self.device, e))?;
        } else {
            let _node = tokio::fs::File::open(&self.device)
                .await
                .map_err(|e| map_io_error(&self.device, e))?;
        }

        debug!(device = ?self.device, "capture device accessible");
        Ok(())
    }
}

fn map_io_error(device: &Path, err: std::io::Error) -> CaptureError {
    match err.kind() {
        ErrorKind::PermissionDenied => CaptureError::Denied,
        ErrorKind::NotFound => {
            CaptureError::Unavailable(format!("{} does not exist", device.display()))
        }
        _ => CaptureError::Unavailable(err.to_string()),
    }
}
