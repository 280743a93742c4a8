//! V4L2 camera capture via the `v4l` crate.

use crate::capture::VideoSource;
use crate::error::DeviceError;
use crate::frame::{self, Frame};
use std::io;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Frames discarded after stream start while AGC/AE settles.
pub const DEFAULT_WARMUP_FRAMES: usize = 4;

/// Longest a single dequeue may block before the read gives up.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

/// V4L2 camera device handle.
///
/// Holding a `Camera` keeps the device node open and the mmap stream
/// running from `open` until [`VideoSource::stop`], which drops the stream
/// (STREAMOFF) and then closes the node.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    warmup_frames: usize,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, DeviceError> {
        if !Path::new(device_path).exists() {
            return Err(DeviceError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            DeviceError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(DeviceError::StreamingNotSupported);
        }

        // Ask for YUYV; accept GREY/Y16 if that is what the driver hands back.
        let mut fmt = device.format().map_err(|e| {
            DeviceError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            DeviceError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(DeviceError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| {
                DeviceError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        stream
            .start()
            .map_err(|e| DeviceError::CaptureFailed(format!("failed to start stream: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        })
    }

    /// Set how many frames [`VideoSource::warm_up`] discards.
    pub fn with_warmup_frames(mut self, frames: usize) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoSource for Camera {
    fn warm_up(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
        for _ in 0..self.warmup_frames {
            if let Err(e) = stream.next() {
                tracing::warn!(error = %e, "warmup dequeue failed");
                break;
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let stream = self.stream.as_mut().ok_or(DeviceError::Released)?;

        // Buffers filled while nobody was reading are stale. Cycling past all
        // of them makes the next dequeue a frame captured after this call.
        for _ in 0..STREAM_BUFFERS {
            if let Err(e) = stream.next() {
                return dequeue_failed(e);
            }
        }

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => return dequeue_failed(e),
        };
        let sequence = meta.sequence;

        if meta.bytesused == 0 || buf.is_empty() {
            tracing::debug!(seq = sequence, "empty buffer; camera not streaming yet");
            return Ok(None);
        }

        let gray = to_grayscale(format, width, height, buf)?;
        if frame::is_dark_frame(&gray, frame::DARK_FRAME_THRESHOLD) {
            tracing::debug!(seq = sequence, "dark frame");
            return Ok(None);
        }

        Ok(Some(Frame {
            data: gray,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }))
    }

    fn stop(&mut self) {
        drop(self.stream.take());
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera closed");
        }
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

/// Convert a raw buffer to grayscale based on the negotiated format.
fn to_grayscale(
    format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<Vec<u8>, DeviceError> {
    let pixels = (width * height) as usize;

    match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(DeviceError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Y16 => frame::y16_to_grayscale(buf, width, height)
            .map_err(|e| DeviceError::CaptureFailed(format!("Y16 conversion failed: {e}"))),
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| DeviceError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

/// A dequeue that times out is a camera that is not ready, not a failure.
fn dequeue_failed(e: io::Error) -> Result<Option<Frame>, DeviceError> {
    if e.kind() == io::ErrorKind::TimedOut {
        tracing::warn!(
            timeout_ms = DEQUEUE_TIMEOUT.as_millis() as u64,
            "no frame before dequeue timeout"
        );
        return Ok(None);
    }
    Err(DeviceError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
}

fn open_error(device_path: &str, e: io::Error) -> DeviceError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(device_path.to_string()),
        io::ErrorKind::NotFound => DeviceError::DeviceNotFound(device_path.to_string()),
        _ if e.raw_os_error() == Some(16) || e.to_string().contains("busy") => {
            DeviceError::DeviceBusy
        }
        _ => DeviceError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}
