use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no camera found: {0}")]
    DeviceNotFound(String),
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] crate::frame::FrameError),
    #[error("camera released")]
    Released,
}

impl DeviceError {
    /// Short operator-facing text for the status line.
    pub fn status_message(&self) -> String {
        match self {
            DeviceError::PermissionDenied(_) => "Camera access denied".to_string(),
            DeviceError::DeviceNotFound(_) => "No camera available".to_string(),
            DeviceError::DeviceBusy => "Camera is in use by another application".to_string(),
            other => format!("Camera unavailable: {other}"),
        }
    }
}
