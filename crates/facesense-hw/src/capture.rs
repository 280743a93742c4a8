//! Scoped camera acquisition.
//!
//! A [`CaptureDevice`] owns a [`VideoSource`] on a dedicated OS thread and
//! serves snapshot requests over a channel. Releasing the device tells the
//! thread to stop the source and exit; dropping the device releases it.
//! Inside a tokio runtime the join runs on the blocking pool, so releasing
//! never stalls the executor while a read is in flight.

use crate::camera::Camera;
use crate::error::DeviceError;
use crate::frame::{Frame, FrameSnapshot};
use std::sync::{mpsc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::{oneshot, watch};

/// JPEG quality used by the kiosk client unless configured otherwise.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// A live video source the capture thread reads from.
pub trait VideoSource: Send + 'static {
    /// Called once on the capture thread before the first request is served.
    fn warm_up(&mut self) {}

    /// Read the current frame.
    ///
    /// Returns `Ok(None)` while the source has not produced a usable frame yet.
    fn read_frame(&mut self) -> Result<Option<Frame>, DeviceError>;

    /// Stop the underlying hardware stream. Must be idempotent.
    fn stop(&mut self);

    /// Human-readable name for logs.
    fn describe(&self) -> String {
        "video source".to_string()
    }
}

/// Result of a snapshot request.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Frame(FrameSnapshot),
    /// The source has not produced a frame with known dimensions yet; try again.
    NoFrame,
}

enum CaptureRequest {
    Snapshot {
        reply: oneshot::Sender<Result<Snapshot, DeviceError>>,
    },
    Release,
}

/// Handle to an acquired video source.
pub struct CaptureDevice {
    label: String,
    tx: Mutex<Option<mpsc::Sender<CaptureRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    exited: watch::Receiver<bool>,
}

impl CaptureDevice {
    /// Take ownership of `source` and start the capture thread.
    pub fn acquire<S: VideoSource>(source: S, jpeg_quality: u8) -> Result<Self, DeviceError> {
        let label = source.describe();
        let (tx, rx) = mpsc::channel();
        let (exited_tx, exited) = watch::channel(false);

        let worker = std::thread::Builder::new()
            .name("facesense-capture".into())
            .spawn(move || {
                run_worker(source, rx, jpeg_quality);
                let _ = exited_tx.send(true);
            })
            .map_err(|e| DeviceError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        tracing::info!(source = %label, "capture device acquired");

        Ok(Self {
            label,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            exited,
        })
    }

    /// Open a V4L2 camera and acquire it. The capture thread discards
    /// `warmup_frames` before serving snapshots.
    pub fn open_v4l2(
        device_path: &str,
        jpeg_quality: u8,
        warmup_frames: usize,
    ) -> Result<Self, DeviceError> {
        let camera = Camera::open(device_path)?.with_warmup_frames(warmup_frames);
        Self::acquire(camera, jpeg_quality)
    }

    /// Read the current frame and encode it as JPEG.
    pub async fn snapshot(&self) -> Result<Snapshot, DeviceError> {
        let tx = lock(&self.tx).clone().ok_or(DeviceError::Released)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CaptureRequest::Snapshot { reply: reply_tx })
            .map_err(|_| DeviceError::Released)?;
        reply_rx.await.map_err(|_| DeviceError::Released)?
    }

    pub fn is_released(&self) -> bool {
        lock(&self.tx).is_none()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop accepting requests and tell the capture thread to stop the
    /// source. Idempotent.
    ///
    /// Outside a runtime this joins the thread before returning. Inside one
    /// the join is handed to the blocking pool; await [`closed`](Self::closed)
    /// to observe the source stopping.
    pub fn release(&self) {
        let Some(tx) = lock(&self.tx).take() else {
            return;
        };
        let _ = tx.send(CaptureRequest::Release);
        drop(tx);

        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let label = self.label.clone();
        let join = move || {
            if worker.join().is_err() {
                tracing::error!(source = %label, "capture thread panicked");
            }
            tracing::info!(source = %label, "capture device released");
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(join);
            }
            Err(_) => join(),
        }
    }

    /// Resolves once the capture thread has stopped the source and exited.
    pub async fn closed(&self) {
        let mut exited = self.exited.clone();
        // A dropped sender means the thread is gone too.
        let _ = exited.wait_for(|done| *done).await;
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_worker<S: VideoSource>(mut source: S, rx: mpsc::Receiver<CaptureRequest>, jpeg_quality: u8) {
    tracing::debug!("capture thread started");
    source.warm_up();
    while let Ok(req) = rx.recv() {
        match req {
            CaptureRequest::Snapshot { reply } => {
                let _ = reply.send(take_snapshot(&mut source, jpeg_quality));
            }
            CaptureRequest::Release => break,
        }
    }
    source.stop();
    tracing::debug!("capture thread exiting");
}

fn take_snapshot<S: VideoSource>(source: &mut S, jpeg_quality: u8) -> Result<Snapshot, DeviceError> {
    match source.read_frame()? {
        Some(frame) if frame.has_dimensions() => {
            Ok(Snapshot::Frame(FrameSnapshot::encode(&frame, jpeg_quality)?))
        }
        _ => Ok(Snapshot::NoFrame),
    }
}
