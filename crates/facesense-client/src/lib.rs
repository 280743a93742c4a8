//! facesense-client — Concrete collaborators for the kiosk sessions.
//!
//! [`HttpGateway`] speaks JSON to the FaceSense backend; [`GeoClueSource`]
//! reads the device position from GeoClue2 over D-Bus.

pub mod geoclue;
pub mod http;

pub use geoclue::GeoClueSource;
pub use http::{HttpGateway, DEFAULT_TIMEOUT};
