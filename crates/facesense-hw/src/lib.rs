//! facesense-hw — Camera acquisition and still-frame capture.
//!
//! Provides V4L2-based camera access, a [`VideoSource`] seam for other
//! backends, and a scoped [`CaptureDevice`] that encodes JPEG snapshots
//! on demand.

pub mod camera;
pub mod capture;
pub mod error;
pub mod frame;

pub use camera::{Camera, DeviceInfo, PixelFormat, DEFAULT_WARMUP_FRAMES};
pub use capture::{CaptureDevice, Snapshot, VideoSource, DEFAULT_JPEG_QUALITY};
pub use error::DeviceError;
pub use frame::{Frame, FrameSnapshot};
