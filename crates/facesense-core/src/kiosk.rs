//! Recognize-then-mark attendance session.
//!
//! One [`RecognitionSession`] serves one kiosk interaction. `recognize()`
//! captures a frame and asks the gateway for a [`Decision`]; only a
//! `Decided(Verified)` state lets `mark_in()`/`mark_out()` through. Every
//! operation takes `&mut self`, so a second trigger cannot start while one
//! is outstanding.

use crate::error::SessionError;
use crate::gateway::{AttendanceGateway, MarkRequest};
use crate::location::LocationProvider;
use crate::scope::{SessionCloser, SessionScope};
use crate::status::StatusLine;
use crate::types::{AttendanceKind, Decision, MarkReceipt, Subject};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum KioskState {
    Idle,
    /// A frame was captured; the coordinate is being attached.
    Capturing,
    /// Frame submitted; waiting for the gateway.
    AwaitingDecision,
    /// The live outcome of the latest recognize attempt.
    Decided(Decision),
    Marking {
        subject: Subject,
        kind: AttendanceKind,
    },
    /// Attendance recorded. The outcome is spent; the next step is a new
    /// recognize attempt.
    Marked(MarkReceipt),
}

impl KioskState {
    pub fn name(&self) -> &'static str {
        match self {
            KioskState::Idle => "idle",
            KioskState::Capturing => "capturing",
            KioskState::AwaitingDecision => "awaiting_decision",
            KioskState::Decided(Decision::Verified { .. }) => "decided_success",
            KioskState::Decided(Decision::LocationMismatch { .. }) => "decided_mismatch",
            KioskState::Decided(Decision::Unrecognized { .. }) => "decided_unrecognized",
            KioskState::Marking { .. } => "marking",
            KioskState::Marked(_) => "marked",
        }
    }
}

pub struct RecognitionSession<G: AttendanceGateway> {
    scope: SessionScope,
    gateway: Arc<G>,
    state: watch::Sender<KioskState>,
    status: StatusLine,
}

impl<G: AttendanceGateway> RecognitionSession<G> {
    pub fn new(scope: SessionScope, gateway: Arc<G>) -> Self {
        let (state, _) = watch::channel(KioskState::Idle);
        let status = StatusLine::new(scope.id());
        status.set(
            scope
                .camera_status()
                .unwrap_or_else(|| "Ready - press Recognize".to_string()),
        );
        Self {
            scope,
            gateway,
            state,
            status,
        }
    }

    pub fn state(&self) -> KioskState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<KioskState> {
        self.state.subscribe()
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

    /// Whether the recognize action should be offered.
    pub fn can_recognize(&self) -> bool {
        self.scope.is_live() && self.scope.camera_available()
    }

    /// Whether the IN/OUT actions should be offered.
    pub fn can_mark(&self) -> bool {
        self.scope.is_live()
            && matches!(&*self.state.borrow(), KioskState::Decided(d) if d.is_verified())
    }

    /// Capture a frame and obtain a decision for it.
    ///
    /// Any previous outcome is discarded first. Camera problems are returned
    /// as errors without contacting the gateway; gateway failures become
    /// [`Decision::Unrecognized`] carrying the failure text.
    pub async fn recognize(&mut self) -> Result<Decision, SessionError> {
        self.scope.ensure_live()?;
        self.state.send_replace(KioskState::Idle);

        let frame = self.scope.capture(&self.status).await?;

        self.transition(KioskState::Capturing, "Frame captured");
        let coordinate = self.scope.location().current();
        if let Some(message) = self.scope.location().status_message() {
            tracing::debug!(session = %self.scope.id(), location = %message, "recognizing without location");
        }

        self.transition(KioskState::AwaitingDecision, "Recognizing...");
        tracing::info!(
            session = %self.scope.id(),
            bytes = frame.jpeg().len(),
            located = coordinate.is_some(),
            "submitting frame for recognition"
        );
        let result = self.gateway.recognize(&frame, coordinate).await;
        drop(frame);

        if !self.scope.is_live() {
            tracing::debug!(session = %self.scope.id(), "session closed during recognition; discarding response");
            return Err(SessionError::Closed);
        }

        let decision = match result {
            Ok(outcome) => outcome.into_decision(),
            Err(e) => {
                tracing::warn!(session = %self.scope.id(), error = %e, "recognize call failed");
                Decision::Unrecognized {
                    confidence: None,
                    message: e.to_string(),
                }
            }
        };

        let message = decision.status_message();
        self.transition(KioskState::Decided(decision.clone()), message);
        Ok(decision)
    }

    pub async fn mark_in(&mut self) -> Result<MarkReceipt, SessionError> {
        self.mark(AttendanceKind::In).await
    }

    pub async fn mark_out(&mut self) -> Result<MarkReceipt, SessionError> {
        self.mark(AttendanceKind::Out).await
    }

    /// Record an attendance event for the verified subject.
    ///
    /// Rejected locally, with no gateway call and no state change, unless
    /// the live outcome is verified. A failed mark returns to the verified
    /// state so it can be retried without recapturing.
    pub async fn mark(&mut self, kind: AttendanceKind) -> Result<MarkReceipt, SessionError> {
        self.scope.ensure_live()?;

        let decided = self.state();
        let subject = match &decided {
            KioskState::Decided(Decision::Verified { subject, .. }) => subject.clone(),
            other => {
                tracing::warn!(
                    session = %self.scope.id(),
                    state = other.name(),
                    %kind,
                    "mark rejected: no verified recognition"
                );
                return Err(SessionError::NotVerified);
            }
        };

        self.transition(
            KioskState::Marking {
                subject: subject.clone(),
                kind,
            },
            format!("Marking {kind}..."),
        );

        let request = MarkRequest {
            subject: &subject,
            kind,
            coordinate: self.scope.location().current(),
            location_ok: true,
        };
        let result = self.gateway.mark(request).await;

        if !self.scope.is_live() {
            tracing::debug!(session = %self.scope.id(), "session closed while marking; discarding response");
            return Err(SessionError::Closed);
        }

        let failure = match result {
            Ok(ack) if ack.ok => {
                tracing::info!(
                    session = %self.scope.id(),
                    subject = %subject.id,
                    %kind,
                    server = ack.message.as_deref().unwrap_or(""),
                    "attendance marked"
                );
                let receipt = MarkReceipt {
                    subject: subject.clone(),
                    kind,
                    message: ack.message,
                    marked_at: chrono::Local::now(),
                };
                self.transition(
                    KioskState::Marked(receipt.clone()),
                    format!("{} marked {kind} successfully", subject.name),
                );
                return Ok(receipt);
            }
            Ok(ack) => ack
                .message
                .unwrap_or_else(|| format!("Could not mark {kind}")),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            session = %self.scope.id(),
            subject = %subject.id,
            %kind,
            error = %failure,
            "mark failed; verified recognition kept for retry"
        );
        self.transition(decided, failure.clone());
        Err(SessionError::MarkFailed(failure))
    }

    /// Drop the current outcome and return to idle.
    pub fn reset(&mut self) {
        if self.scope.is_live() {
            self.transition(KioskState::Idle, "Ready - press Recognize");
        }
    }

    /// End the session: release camera and location.
    pub fn close(&self) {
        self.scope.close();
        self.status.set("Session closed");
    }

    fn transition(&self, next: KioskState, message: impl Into<String>) {
        tracing::debug!(session = %self.scope.id(), state = next.name(), "kiosk transition");
        self.state.send_replace(next);
        self.status.set(message);
    }
}
