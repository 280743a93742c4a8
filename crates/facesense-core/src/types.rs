use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of face samples collected per subject during enrollment.
pub const SAMPLES_PER_SUBJECT: u32 = 30;

/// A device position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Validate a raw reading. Non-finite or out-of-range values yield `None`.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self { latitude, longitude })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

/// Opaque subject identifier; the backend uses integers but the client
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Numeric(i64),
    Text(String),
}

impl From<i64> for SubjectId {
    fn from(id: i64) -> Self {
        SubjectId::Numeric(id)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        match id.parse::<i64>() {
            Ok(n) => SubjectId::Numeric(n),
            Err(_) => SubjectId::Text(id.to_string()),
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Numeric(n) => write!(f, "{n}"),
            SubjectId::Text(s) => f.write_str(s),
        }
    }
}

/// A recognized person.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

/// Attendance event direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceKind {
    In,
    Out,
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceKind::In => f.write_str("IN"),
            AttendanceKind::Out => f.write_str("OUT"),
        }
    }
}

/// The server's verdict on one recognize call, folded into the three cases
/// the kiosk acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Face matched and the coordinate is inside the campus boundary.
    Verified { subject: Subject, confidence: f32 },
    /// Face matched but the location check failed.
    LocationMismatch { subject: Subject, confidence: f32 },
    /// No match, no face, or the call failed.
    Unrecognized {
        confidence: Option<f32>,
        message: String,
    },
}

impl Decision {
    pub fn is_verified(&self) -> bool {
        matches!(self, Decision::Verified { .. })
    }

    pub fn subject(&self) -> Option<&Subject> {
        match self {
            Decision::Verified { subject, .. } | Decision::LocationMismatch { subject, .. } => {
                Some(subject)
            }
            Decision::Unrecognized { .. } => None,
        }
    }

    /// Status line text for this decision.
    pub fn status_message(&self) -> String {
        match self {
            Decision::Verified {
                subject,
                confidence,
            } => format!(
                "Recognized {} ({}% match) - press IN or OUT",
                subject.name,
                format_confidence(*confidence)
            ),
            Decision::LocationMismatch {
                subject,
                confidence,
            } => format!(
                "{} ({}% match) - location mismatch, attendance denied",
                subject.name,
                format_confidence(*confidence)
            ),
            Decision::Unrecognized { message, .. } => message.clone(),
        }
    }
}

fn format_confidence(confidence: f32) -> String {
    let rounded = (confidence * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}

/// Confirmation of a marked attendance event.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkReceipt {
    pub subject: Subject,
    pub kind: AttendanceKind,
    /// Server-provided detail, e.g. the recorded time.
    pub message: Option<String>,
    pub marked_at: chrono::DateTime<chrono::Local>,
}

/// Enrollment sample counter for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentProgress {
    pub subject_id: SubjectId,
    samples_captured: u32,
    samples_target: u32,
}

impl EnrollmentProgress {
    pub fn new(subject_id: SubjectId, samples_target: u32) -> Self {
        Self {
            subject_id,
            samples_captured: 0,
            samples_target,
        }
    }

    /// Resume from a count reported by the server, clamped to the target.
    pub fn resumed(subject_id: SubjectId, samples_target: u32, existing: u32) -> Self {
        Self {
            subject_id,
            samples_captured: existing.min(samples_target),
            samples_target,
        }
    }

    pub fn samples_captured(&self) -> u32 {
        self.samples_captured
    }

    pub fn samples_target(&self) -> u32 {
        self.samples_target
    }

    pub fn is_complete(&self) -> bool {
        self.samples_captured >= self.samples_target
    }

    /// Count one acknowledged sample.
    ///
    /// An acknowledged sample always advances the counter by at least one.
    /// A higher server total is adopted. The counter never passes the target.
    pub fn record_sample(&mut self, server_total: Option<u32>) {
        let counted = self.samples_captured + 1;
        self.samples_captured = server_total
            .unwrap_or(0)
            .max(counted)
            .min(self.samples_target);
    }
}

impl fmt::Display for EnrollmentProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.samples_captured, self.samples_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_rejects_out_of_range() {
        assert!(Coordinate::new(40.0, -75.0).is_some());
        assert!(Coordinate::new(91.0, 0.0).is_none());
        assert!(Coordinate::new(0.0, -180.5).is_none());
        assert!(Coordinate::new(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn test_subject_id_wire_shape() {
        let numeric: SubjectId = serde_json::from_str("7").unwrap();
        assert_eq!(numeric, SubjectId::Numeric(7));
        let text: SubjectId = serde_json::from_str("\"stf-12\"").unwrap();
        assert_eq!(text, SubjectId::Text("stf-12".into()));
        assert_eq!(serde_json::to_string(&SubjectId::from(7)).unwrap(), "7");
        assert_eq!(SubjectId::from("42"), SubjectId::Numeric(42));
    }

    #[test]
    fn test_attendance_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AttendanceKind::In).unwrap(), "\"in\"");
        assert_eq!(AttendanceKind::Out.to_string(), "OUT");
    }

    #[test]
    fn test_decision_status_messages() {
        let subject = Subject {
            id: 7.into(),
            name: "Asha Rao".into(),
        };
        let verified = Decision::Verified {
            subject: subject.clone(),
            confidence: 92.0,
        };
        assert_eq!(
            verified.status_message(),
            "Recognized Asha Rao (92% match) - press IN or OUT"
        );
        let mismatch = Decision::LocationMismatch {
            subject,
            confidence: 88.46,
        };
        assert_eq!(
            mismatch.status_message(),
            "Asha Rao (88.5% match) - location mismatch, attendance denied"
        );
    }

    #[test]
    fn test_progress_increments_and_clamps() {
        let mut progress = EnrollmentProgress::new(1.into(), 3);
        progress.record_sample(None);
        progress.record_sample(None);
        assert_eq!(progress.samples_captured(), 2);
        progress.record_sample(Some(10));
        assert_eq!(progress.samples_captured(), 3);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_acknowledged_sample_counts_despite_lower_server_total() {
        let mut progress = EnrollmentProgress::resumed(1.into(), 30, 12);
        progress.record_sample(Some(4));
        assert_eq!(progress.samples_captured(), 13);
        progress.record_sample(Some(1));
        assert_eq!(progress.samples_captured(), 14);
        progress.record_sample(Some(20));
        assert_eq!(progress.samples_captured(), 20);
    }

    #[test]
    fn test_resumed_clamps_to_target() {
        let progress = EnrollmentProgress::resumed(1.into(), 30, 45);
        assert_eq!(progress.to_string(), "30/30");
    }
}
