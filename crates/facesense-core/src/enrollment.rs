//! Face sample collection for a new subject.
//!
//! An [`EnrollmentSession`] repeatedly captures a frame and submits it with
//! the current coordinate until the subject has [`SAMPLES_PER_SUBJECT`]
//! samples on the server. Progress starts from the server's own count, so an
//! interrupted enrollment resumes where it stopped.

use crate::error::SessionError;
use crate::gateway::AttendanceGateway;
use crate::location::LocationProvider;
use crate::scope::{SessionCloser, SessionScope};
use crate::status::StatusLine;
use crate::types::{EnrollmentProgress, SubjectId, SAMPLES_PER_SUBJECT};
use std::sync::Arc;
use tokio::sync::watch;

/// Result of one `capture_one()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Accepted {
        progress: EnrollmentProgress,
        /// This sample anchored the subject's registered location.
        location_saved: bool,
    },
    /// Submitted but not counted. The loop may continue.
    Rejected { reason: String },
    /// Target already reached; nothing was captured or sent.
    AlreadyComplete,
}

pub struct EnrollmentSession<G: AttendanceGateway> {
    scope: SessionScope,
    gateway: Arc<G>,
    progress: EnrollmentProgress,
    status: StatusLine,
}

impl<G: AttendanceGateway> EnrollmentSession<G> {
    /// Open an enrollment for `subject`, resuming from the server's count.
    pub async fn start(scope: SessionScope, gateway: Arc<G>, subject: SubjectId) -> Self {
        let progress = match gateway.sample_count(&subject).await {
            Ok(Some(existing)) => {
                tracing::info!(session = %scope.id(), subject = %subject, samples = existing, "resuming enrollment");
                EnrollmentProgress::resumed(subject, SAMPLES_PER_SUBJECT, existing)
            }
            Ok(None) => EnrollmentProgress::new(subject, SAMPLES_PER_SUBJECT),
            Err(e) => {
                tracing::warn!(session = %scope.id(), subject = %subject, error = %e, "could not read existing samples; starting from 0");
                EnrollmentProgress::new(subject, SAMPLES_PER_SUBJECT)
            }
        };

        let status = StatusLine::new(scope.id());
        status.set(initial_status(&scope, &progress));

        Self {
            scope,
            gateway,
            progress,
            status,
        }
    }

    pub fn progress(&self) -> EnrollmentProgress {
        self.progress.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn can_capture(&self) -> bool {
        self.scope.is_live() && self.scope.camera_available() && !self.is_complete()
    }

    pub fn status(&self) -> String {
        self.status.current()
    }

    pub fn watch_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    pub fn location(&self) -> &LocationProvider {
        self.scope.location()
    }

    pub fn closer(&self) -> SessionCloser {
        self.scope.closer()
    }

    /// Capture and submit one sample.
    ///
    /// A no-op once the target is reached. Rejections and gateway failures
    /// leave the count unchanged; camera problems are returned as errors.
    pub async fn capture_one(&mut self) -> Result<SampleOutcome, SessionError> {
        self.scope.ensure_live()?;
        if self.is_complete() {
            return Ok(SampleOutcome::AlreadyComplete);
        }

        let frame = self.scope.capture(&self.status).await?;
        let coordinate = self.scope.location().current();
        let subject = self.progress.subject_id.clone();

        let result = self.gateway.enroll(&subject, &frame, coordinate).await;
        drop(frame);

        if !self.scope.is_live() {
            tracing::debug!(session = %self.scope.id(), "session closed during enrollment; discarding response");
            return Err(SessionError::Closed);
        }

        let reason = match result {
            Ok(ack) if ack.accepted => {
                self.progress.record_sample(ack.samples);
                let progress = self.progress();
                tracing::info!(
                    session = %self.scope.id(),
                    subject = %subject,
                    samples = progress.samples_captured(),
                    location_saved = ack.location_saved,
                    "sample accepted"
                );
                self.status
                    .set(sample_status(&progress, ack.location_saved));
                return Ok(SampleOutcome::Accepted {
                    progress,
                    location_saved: ack.location_saved,
                });
            }
            Ok(ack) => ack
                .message
                .unwrap_or_else(|| "Sample rejected".to_string()),
            Err(e) => e.to_string(),
        };

        tracing::warn!(session = %self.scope.id(), subject = %subject, reason = %reason, "sample not counted");
        self.status.set(reason.clone());
        Ok(SampleOutcome::Rejected { reason })
    }

    /// End the session: release camera and location.
    pub fn close(&self) {
        self.scope.close();
    }
}

fn initial_status(scope: &SessionScope, progress: &EnrollmentProgress) -> String {
    if let Some(camera) = scope.camera_status() {
        return camera;
    }
    if progress.is_complete() {
        return format!("Enrollment complete ({progress})");
    }
    if progress.samples_captured() == 0 && scope.location().current().is_none() {
        return "Allow location for first-time registration".to_string();
    }
    format!("Ready - {progress} samples")
}

fn sample_status(progress: &EnrollmentProgress, location_saved: bool) -> String {
    if progress.is_complete() {
        format!("Enrollment complete ({progress})")
    } else if location_saved {
        format!("Captured {progress} - location anchored")
    } else {
        format!("Captured {progress}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{EnrollAck, GatewayError};
    use crate::testing::{fake_camera, located, CameraStats, FakeCamera, FakeGateway};
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    async fn enrollment(
        gateway: FakeGateway,
    ) -> (EnrollmentSession<FakeGateway>, Arc<FakeGateway>, Arc<CameraStats>) {
        let (camera, stats) = fake_camera(FakeCamera::ready());
        let scope = SessionScope::open(camera, located(40.0, -75.0).await);
        let gateway = Arc::new(gateway);
        let session = EnrollmentSession::start(scope, gateway.clone(), 7.into()).await;
        (session, gateway, stats)
    }

    #[tokio::test]
    async fn test_failed_sample_does_not_count() {
        let mut gateway = FakeGateway::default();
        for _ in 0..5 {
            gateway = gateway.on_enroll(Ok(EnrollAck {
                accepted: true,
                ..EnrollAck::default()
            }));
        }
        let gateway = gateway.on_enroll(Err(GatewayError::Transport("timed out".into())));
        let (mut session, gateway, _stats) = enrollment(gateway).await;

        for _ in 0..5 {
            assert!(matches!(
                session.capture_one().await.unwrap(),
                SampleOutcome::Accepted { .. }
            ));
        }
        assert_eq!(session.progress().samples_captured(), 5);
        assert_eq!(session.status(), "Captured 5/30");

        let outcome = session.capture_one().await.unwrap();
        assert_eq!(
            outcome,
            SampleOutcome::Rejected {
                reason: "gateway unreachable: timed out".into()
            }
        );
        assert_eq!(session.progress().samples_captured(), 5);
        assert!(session.can_capture());
        assert_eq!(gateway.calls().1, 6);
    }

    #[tokio::test]
    async fn test_complete_enrollment_is_a_no_op() {
        let (mut session, gateway, stats) =
            enrollment(FakeGateway::default().with_existing_samples(Ok(Some(29)))).await;
        assert_eq!(session.progress().samples_captured(), 29);

        session.capture_one().await.unwrap();
        assert!(session.is_complete());
        assert_eq!(session.status(), "Enrollment complete (30/30)");
        let reads = stats.reads.load(Ordering::SeqCst);

        for _ in 0..3 {
            assert_eq!(
                session.capture_one().await.unwrap(),
                SampleOutcome::AlreadyComplete
            );
        }
        assert_eq!(session.progress().samples_captured(), 30);
        assert_eq!(stats.reads.load(Ordering::SeqCst), reads);
        assert_eq!(gateway.calls().1, 1);
        assert!(!session.can_capture());
    }

    #[tokio::test]
    async fn test_resume_from_server_count() {
        let (session, _gateway, _stats) =
            enrollment(FakeGateway::default().with_existing_samples(Ok(Some(12)))).await;
        assert_eq!(session.progress().samples_captured(), 12);
        assert_eq!(session.status(), "Ready - 12/30 samples");
    }

    #[tokio::test]
    async fn test_sample_count_failure_starts_from_zero() {
        let (session, _gateway, _stats) = enrollment(
            FakeGateway::default()
                .with_existing_samples(Err(GatewayError::Transport("refused".into()))),
        )
        .await;
        assert_eq!(session.progress().samples_captured(), 0);
    }

    #[tokio::test]
    async fn test_server_total_wins_and_is_clamped() {
        let (mut session, _gateway, _stats) = enrollment(
            FakeGateway::default()
                .on_enroll(Ok(EnrollAck {
                    accepted: true,
                    samples: Some(8),
                    location_saved: true,
                    message: None,
                }))
                .on_enroll(Ok(EnrollAck {
                    accepted: true,
                    samples: Some(44),
                    ..EnrollAck::default()
                })),
        )
        .await;

        let outcome = session.capture_one().await.unwrap();
        assert!(matches!(
            outcome,
            SampleOutcome::Accepted {
                location_saved: true,
                ..
            }
        ));
        assert_eq!(session.status(), "Captured 8/30 - location anchored");

        session.capture_one().await.unwrap();
        assert_eq!(session.progress().samples_captured(), 30);
        assert!(session.is_complete());
    }

    #[tokio::test]
    async fn test_rejection_surfaces_server_message() {
        let (mut session, _gateway, _stats) = enrollment(FakeGateway::default().on_enroll(Ok(
            EnrollAck {
                accepted: false,
                message: Some("No face detected in image".into()),
                ..EnrollAck::default()
            },
        )))
        .await;

        let outcome = session.capture_one().await.unwrap();
        assert!(matches!(outcome, SampleOutcome::Rejected { .. }));
        assert_eq!(session.status(), "No face detected in image");
        assert_eq!(session.progress().samples_captured(), 0);
    }

    #[tokio::test]
    async fn test_first_registration_asks_for_location() {
        let (camera, _stats) = fake_camera(FakeCamera::ready());
        let scope = SessionScope::open(camera, LocationProvider::unavailable("denied"));
        let session =
            EnrollmentSession::start(scope, Arc::new(FakeGateway::default()), 7.into()).await;
        assert_eq!(
            session.status(),
            "Allow location for first-time registration"
        );
    }

    #[tokio::test]
    async fn test_no_frame_is_not_submitted() {
        let gateway = Arc::new(FakeGateway::default());
        let (camera, _stats) = fake_camera(FakeCamera::warming_up(1));
        let scope = SessionScope::open(camera, located(40.0, -75.0).await);
        let mut session = EnrollmentSession::start(scope, gateway.clone(), 7.into()).await;

        assert!(matches!(
            session.capture_one().await,
            Err(SessionError::CameraNotReady)
        ));
        assert_eq!(gateway.calls().1, 0);
        assert_eq!(session.progress().samples_captured(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_camera() {
        let (mut session, gateway, stats) = enrollment(FakeGateway::default()).await;
        session.close();
        stats.wait_stopped().await;
        assert!(matches!(
            session.capture_one().await,
            Err(SessionError::Closed)
        ));
        assert_eq!(gateway.calls().1, 0);
    }

    #[tokio::test]
    async fn test_close_during_enroll_discards_ack() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (mut session, gateway, stats) = enrollment(
            FakeGateway::default()
                .with_existing_samples(Ok(Some(12)))
                .on_enroll(Ok(EnrollAck {
                    accepted: true,
                    samples: Some(13),
                    ..EnrollAck::default()
                }))
                .holding(entered.clone(), release.clone()),
        )
        .await;
        let closer = session.closer();
        let status_before = session.status();

        let task = tokio::spawn(async move {
            let result = session.capture_one().await;
            (session, result)
        });
        entered.notified().await;

        closer.close();
        stats.wait_stopped().await;

        release.notify_one();
        let (session, result) = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::Closed)));
        assert_eq!(session.progress().samples_captured(), 12);
        assert_eq!(session.status(), status_before);
        assert!(session.location().is_stopped());
        assert_eq!(gateway.calls().1, 1);
    }
}
