//! Frame types — raw grayscale frames, pixel conversion, and JPEG snapshots.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use std::time::Instant;

/// Share of sub-32 pixels above which a frame counts as dark (sensor warm-up, covered lens).
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// True when the frame has known, non-zero dimensions backed by enough pixels.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.pixel_count()
    }

    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// An encoded JPEG still taken from the live source.
///
/// Immutable once produced. The encoded bytes are reference-counted so the
/// snapshot can be handed to a blocking transport without copying.
#[derive(Clone)]
pub struct FrameSnapshot {
    jpeg: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl FrameSnapshot {
    /// Encode a grayscale frame as JPEG at the given quality (1–100).
    pub fn encode(frame: &Frame, quality: u8) -> Result<Self, FrameError> {
        if !frame.has_dimensions() {
            return Err(FrameError::InvalidLength {
                expected: frame.pixel_count(),
                actual: frame.data.len(),
            });
        }

        let mut jpeg = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
            encoder.encode(
                &frame.data[..frame.pixel_count()],
                frame.width,
                frame.height,
                ExtendedColorType::L8,
            )?;
        }

        Ok(Self {
            jpeg: jpeg.into(),
            width: frame.width,
            height: frame.height,
        })
    }

    /// Build a snapshot from already-encoded JPEG bytes.
    pub fn from_jpeg(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            jpeg: jpeg.into(),
            width,
            height,
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl std::fmt::Debug for FrameSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSnapshot")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("jpeg_bytes", &self.jpeg.len())
            .finish()
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Check if a frame is dark: more than `threshold_pct` of pixels below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
