//! The attendance backend as seen from the kiosk.
//!
//! Matching and geofencing happen server-side; the client only submits
//! frames and coordinates and acts on the answers.

use crate::types::{AttendanceKind, Coordinate, Decision, Subject, SubjectId};
use facesense_hw::FrameSnapshot;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),
    /// The server answered with an error status; `message` is its own text.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// Raw answer to a recognize call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionOutcome {
    pub recognized: bool,
    pub subject_id: Option<SubjectId>,
    pub subject_name: Option<String>,
    /// Match confidence in percent (0–100).
    pub confidence: Option<f32>,
    pub location_ok: Option<bool>,
    pub message: Option<String>,
}

impl RecognitionOutcome {
    /// Fold the two server booleans into a [`Decision`].
    ///
    /// A response claiming recognition without identifying the subject is
    /// treated as unrecognized.
    pub fn into_decision(self) -> Decision {
        let confidence = self.confidence.map(|c| c.clamp(0.0, 100.0));

        let subject = match (self.recognized, self.subject_id) {
            (true, Some(id)) => Some(Subject {
                name: self.subject_name.unwrap_or_else(|| id.to_string()),
                id,
            }),
            _ => None,
        };

        match subject {
            Some(subject) if self.location_ok == Some(true) => Decision::Verified {
                subject,
                confidence: confidence.unwrap_or(0.0),
            },
            Some(subject) => Decision::LocationMismatch {
                subject,
                confidence: confidence.unwrap_or(0.0),
            },
            None => Decision::Unrecognized {
                confidence,
                message: self
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Face not recognized".to_string()),
            },
        }
    }
}

/// Answer to an enrollment submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollAck {
    pub accepted: bool,
    /// Server's total sample count for the subject after this submission.
    pub samples: Option<u32>,
    /// Whether this submission anchored the subject's registered location.
    pub location_saved: bool,
    pub message: Option<String>,
}

/// A mark-attendance request.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRequest<'a> {
    pub subject: &'a Subject,
    pub kind: AttendanceKind,
    pub coordinate: Option<Coordinate>,
    pub location_ok: bool,
}

/// Answer to a mark-attendance request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkAck {
    pub ok: bool,
    pub message: Option<String>,
}

/// Request/response backend consumed by both sessions.
///
/// None of the calls are assumed idempotent; sessions invoke each at most
/// once per user action.
pub trait AttendanceGateway: Send + Sync + 'static {
    fn recognize(
        &self,
        frame: &FrameSnapshot,
        coordinate: Option<Coordinate>,
    ) -> impl Future<Output = Result<RecognitionOutcome, GatewayError>> + Send;

    fn enroll(
        &self,
        subject: &SubjectId,
        frame: &FrameSnapshot,
        coordinate: Option<Coordinate>,
    ) -> impl Future<Output = Result<EnrollAck, GatewayError>> + Send;

    fn mark(
        &self,
        request: MarkRequest<'_>,
    ) -> impl Future<Output = Result<MarkAck, GatewayError>> + Send;

    /// Samples already stored for `subject`, if the server knows it.
    fn sample_count(
        &self,
        subject: &SubjectId,
    ) -> impl Future<Output = Result<Option<u32>, GatewayError>> + Send;
}
