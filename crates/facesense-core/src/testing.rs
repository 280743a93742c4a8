//! Test doubles for the camera, location, and gateway seams.

use crate::gateway::{
    AttendanceGateway, EnrollAck, GatewayError, MarkAck, MarkRequest, RecognitionOutcome,
};
use crate::location::{FixedLocation, LocationConfig, LocationProvider};
use crate::types::{AttendanceKind, Coordinate, SubjectId};
use facesense_hw::{CaptureDevice, DeviceError, Frame, FrameSnapshot, VideoSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Default)]
pub struct CameraStats {
    pub stopped: AtomicBool,
    pub stop_calls: AtomicUsize,
    pub reads: AtomicUsize,
}

impl CameraStats {
    /// Wait for the capture thread to stop the camera after a release.
    pub async fn wait_stopped(&self) {
        let stopped = async {
            while !self.stopped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), stopped)
            .await
            .expect("camera stopped after release");
    }
}

/// Yields scripted readiness, then a gray frame on every read.
pub struct FakeCamera {
    warmup_reads: usize,
    stats: Arc<CameraStats>,
}

impl FakeCamera {
    pub fn ready() -> Self {
        Self::warming_up(0)
    }

    /// A camera whose first `reads` reads produce no frame.
    pub fn warming_up(reads: usize) -> Self {
        Self {
            warmup_reads: reads,
            stats: Arc::default(),
        }
    }
}

impl VideoSource for FakeCamera {
    fn read_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if self.warmup_reads > 0 {
            self.warmup_reads -= 1;
            return Ok(None);
        }
        Ok(Some(Frame {
            data: vec![140; 16 * 12],
            width: 16,
            height: 12,
            timestamp: Instant::now(),
            sequence: 0,
        }))
    }

    fn stop(&mut self) {
        self.stats.stopped.store(true, Ordering::SeqCst);
        self.stats.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "fake camera".to_string()
    }
}

pub fn fake_camera(camera: FakeCamera) -> (Result<CaptureDevice, DeviceError>, Arc<CameraStats>) {
    let stats = camera.stats.clone();
    (CaptureDevice::acquire(camera, 80), stats)
}

/// A provider that already holds a fix at `(latitude, longitude)`.
pub async fn located(latitude: f64, longitude: f64) -> LocationProvider {
    let coordinate = Coordinate::new(latitude, longitude).expect("valid test coordinate");
    let provider = LocationProvider::start(FixedLocation(coordinate), LocationConfig::default());
    let mut rx = provider.subscribe();
    rx.changed().await.expect("fixed location publishes");
    provider
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMark {
    pub subject: SubjectId,
    pub name: String,
    pub kind: AttendanceKind,
    pub coordinate: Option<Coordinate>,
    pub location_ok: bool,
}

/// Scripted gateway that records every call.
#[derive(Default)]
pub struct FakeGateway {
    pub recognize_replies: Mutex<VecDeque<Result<RecognitionOutcome, GatewayError>>>,
    pub enroll_replies: Mutex<VecDeque<Result<EnrollAck, GatewayError>>>,
    pub mark_replies: Mutex<VecDeque<Result<MarkAck, GatewayError>>>,
    pub existing_samples: Mutex<Option<Result<Option<u32>, GatewayError>>>,

    pub recognize_calls: AtomicUsize,
    pub enroll_calls: AtomicUsize,
    pub mark_calls: AtomicUsize,
    pub recognize_coordinates: Mutex<Vec<Option<Coordinate>>>,
    pub marks: Mutex<Vec<RecordedMark>>,

    /// When set, recognize and enroll signal `entered` and wait for `release`.
    pub hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeGateway {
    pub fn on_recognize(self, reply: Result<RecognitionOutcome, GatewayError>) -> Self {
        self.recognize_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn on_enroll(self, reply: Result<EnrollAck, GatewayError>) -> Self {
        self.enroll_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn on_mark(self, reply: Result<MarkAck, GatewayError>) -> Self {
        self.mark_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_existing_samples(self, reply: Result<Option<u32>, GatewayError>) -> Self {
        *self.existing_samples.lock().unwrap() = Some(reply);
        self
    }

    pub fn holding(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.hold = Some((entered, release));
        self
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.recognize_calls.load(Ordering::SeqCst),
            self.enroll_calls.load(Ordering::SeqCst),
            self.mark_calls.load(Ordering::SeqCst),
        )
    }
}

impl AttendanceGateway for FakeGateway {
    async fn recognize(
        &self,
        _frame: &FrameSnapshot,
        coordinate: Option<Coordinate>,
    ) -> Result<RecognitionOutcome, GatewayError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        self.recognize_coordinates.lock().unwrap().push(coordinate);
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }
        let reply = self.recognize_replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Err(GatewayError::Transport("no scripted reply".into())))
    }

    async fn enroll(
        &self,
        _subject: &SubjectId,
        _frame: &FrameSnapshot,
        _coordinate: Option<Coordinate>,
    ) -> Result<EnrollAck, GatewayError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }
        let reply = self.enroll_replies.lock().unwrap().pop_front();
        reply.unwrap_or(Ok(EnrollAck {
            accepted: true,
            ..EnrollAck::default()
        }))
    }

    async fn mark(&self, request: MarkRequest<'_>) -> Result<MarkAck, GatewayError> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        self.marks.lock().unwrap().push(RecordedMark {
            subject: request.subject.id.clone(),
            name: request.subject.name.clone(),
            kind: request.kind,
            coordinate: request.coordinate,
            location_ok: request.location_ok,
        });
        let reply = self.mark_replies.lock().unwrap().pop_front();
        reply.unwrap_or(Ok(MarkAck {
            ok: true,
            message: None,
        }))
    }

    async fn sample_count(&self, _subject: &SubjectId) -> Result<Option<u32>, GatewayError> {
        self.existing_samples
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(None))
    }
}

pub fn matched(id: i64, name: &str, confidence: f32, location_ok: bool) -> RecognitionOutcome {
    RecognitionOutcome {
        recognized: true,
        subject_id: Some(id.into()),
        subject_name: Some(name.to_string()),
        confidence: Some(confidence),
        location_ok: Some(location_ok),
        message: None,
    }
}

pub fn not_matched(message: &str) -> RecognitionOutcome {
    RecognitionOutcome {
        recognized: false,
        message: Some(message.to_string()),
        ..RecognitionOutcome::default()
    }
}
