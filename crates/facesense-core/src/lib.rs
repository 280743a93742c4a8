//! facesense-core — Attendance kiosk session logic.
//!
//! Holds the recognize-then-mark state machine, the enrollment sample loop,
//! background location acquisition, and the [`AttendanceGateway`] seam the
//! sessions talk to. Matching and geofencing live behind that seam.

pub mod enrollment;
pub mod error;
pub mod gateway;
pub mod kiosk;
pub mod location;
pub mod scope;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use enrollment::{EnrollmentSession, SampleOutcome};
pub use error::SessionError;
pub use gateway::{
    AttendanceGateway, EnrollAck, GatewayError, MarkAck, MarkRequest, RecognitionOutcome,
};
pub use kiosk::{KioskState, RecognitionSession};
pub use location::{
    Acquisition, FixedLocation, LocationConfig, LocationError, LocationProvider, LocationSource,
    LocationStatus,
};
pub use scope::{SessionCloser, SessionScope};
pub use types::{
    AttendanceKind, Coordinate, Decision, EnrollmentProgress, MarkReceipt, Subject, SubjectId,
    SAMPLES_PER_SUBJECT,
};
