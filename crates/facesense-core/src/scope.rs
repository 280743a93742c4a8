//! Resource ownership for one kiosk interaction.
//!
//! A [`SessionScope`] owns the camera acquisition and the location
//! subscription. Closing it (explicitly, through a [`SessionCloser`], or by
//! dropping it) releases both exactly once. Operations that were in flight
//! when the scope closed check [`SessionScope::is_live`] before applying
//! their results.

use crate::error::SessionError;
use crate::location::LocationProvider;
use crate::status::StatusLine;
use facesense_hw::{CaptureDevice, DeviceError, FrameSnapshot, Snapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct ScopeShared {
    id: Uuid,
    live: AtomicBool,
    camera: Result<CaptureDevice, DeviceError>,
    location: LocationProvider,
}

impl ScopeShared {
    fn close(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(camera) = &self.camera {
            camera.release();
        }
        self.location.stop();
        tracing::info!(session = %self.id, "session closed; camera and location released");
    }
}

pub struct SessionScope {
    shared: Arc<ScopeShared>,
}

impl SessionScope {
    /// Take ownership of an acquisition attempt and a location subscription.
    ///
    /// A failed camera acquisition does not fail the session: capture is
    /// disabled and the reason is reported on the status line.
    pub fn open(camera: Result<CaptureDevice, DeviceError>, location: LocationProvider) -> Self {
        let id = Uuid::new_v4();
        match &camera {
            Ok(device) => tracing::info!(session = %id, camera = %device.label(), "session opened"),
            Err(e) => tracing::warn!(session = %id, error = %e, "session opened without camera; capture disabled"),
        }
        Self {
            shared: Arc::new(ScopeShared {
                id,
                live: AtomicBool::new(true),
                camera,
                location,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn camera_available(&self) -> bool {
        self.shared.camera.is_ok()
    }

    /// Status text for an unavailable camera, `None` when it is usable.
    pub fn camera_status(&self) -> Option<String> {
        self.shared.camera.as_ref().err().map(DeviceError::status_message)
    }

    pub fn location(&self) -> &LocationProvider {
        &self.shared.location
    }

    /// A handle that can tear the session down from another task.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            shared: self.shared.clone(),
        }
    }

    /// Release camera and location. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub(crate) fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Take one snapshot, reporting camera problems on `status`.
    ///
    /// No-frame is surfaced as [`SessionError::CameraNotReady`]; nothing is
    /// sent anywhere in that case.
    pub(crate) async fn capture(&self, status: &StatusLine) -> Result<FrameSnapshot, SessionError> {
        let camera = match &self.shared.camera {
            Ok(camera) => camera,
            Err(e) => {
                let message = e.status_message();
                status.set(message.clone());
                return Err(SessionError::CameraUnavailable(message));
            }
        };

        let snapshot = camera.snapshot().await;
        self.ensure_live()?;

        match snapshot {
            Ok(Snapshot::Frame(frame)) => Ok(frame),
            Ok(Snapshot::NoFrame) => {
                status.set("Camera not ready, try again");
                Err(SessionError::CameraNotReady)
            }
            Err(e) => {
                tracing::warn!(session = %self.id(), error = %e, "snapshot failed");
                status.set(e.status_message());
                Err(SessionError::Capture(e))
            }
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Cloneable teardown handle for a session.
#[derive(Clone)]
pub struct SessionCloser {
    shared: Arc<ScopeShared>,
}

impl SessionCloser {
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }
}
