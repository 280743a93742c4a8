use facesense_hw::DeviceError;
use thiserror::Error;

/// Local failures of a session operation.
///
/// Gateway failures are not listed here for recognition: they fold into an
/// unrecognized decision instead.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    CameraUnavailable(String),
    #[error("camera not ready, try again")]
    CameraNotReady,
    #[error("capture failed: {0}")]
    Capture(#[from] DeviceError),
    #[error("no verified recognition to mark against")]
    NotVerified,
    #[error("{0}")]
    MarkFailed(String),
    #[error("session closed")]
    Closed,
}
