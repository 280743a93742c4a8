//! Desktop geolocation via GeoClue2 on the system bus.
//!
//! The client object is created and started on the first `locate()` call and
//! reused afterwards, so periodic acquisition only re-reads the current
//! location object.

use facesense_core::{Coordinate, LocationError, LocationSource};
use std::time::Duration;
use zbus::proxy::CacheProperties;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

/// GClueAccuracyLevel: EXACT.
const ACCURACY_EXACT: u32 = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
trait Manager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2"
)]
trait Client {
    fn start(&self) -> zbus::Result<()>;
    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn location(&self) -> zbus::Result<OwnedObjectPath>;
    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;
    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2"
)]
trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;
    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;
}

pub struct GeoClueSource {
    desktop_id: String,
    timeout: Duration,
    session: Option<(Connection, ClientProxy<'static>)>,
}

impl GeoClueSource {
    /// `desktop_id` must match a `.desktop` file GeoClue's agent authorizes.
    pub fn new(desktop_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            desktop_id: desktop_id.into(),
            timeout,
            session: None,
        }
    }

    async fn client(&mut self) -> zbus::Result<(Connection, ClientProxy<'static>)> {
        if let Some((conn, client)) = &self.session {
            return Ok((conn.clone(), client.clone()));
        }

        let conn = Connection::system().await?;
        let manager = ManagerProxy::new(&conn).await?;
        let path = manager.get_client().await?;
        let client = ClientProxy::builder(&conn)
            .path(path)?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        client.set_desktop_id(&self.desktop_id).await?;
        client.set_requested_accuracy_level(ACCURACY_EXACT).await?;
        client.start().await?;
        tracing::info!(desktop_id = %self.desktop_id, "geoclue client started");

        self.session = Some((conn.clone(), client.clone()));
        Ok((conn, client))
    }

    async fn fix(&mut self) -> Result<Coordinate, LocationError> {
        let (conn, client) = self.client().await.map_err(location_error)?;
        loop {
            let path = client.location().await.map_err(location_error)?;
            if path.as_str() != "/" {
                let location = LocationProxy::builder(&conn)
                    .path(path)
                    .map_err(location_error)?
                    .cache_properties(CacheProperties::No)
                    .build()
                    .await
                    .map_err(location_error)?;
                let latitude = location.latitude().await.map_err(location_error)?;
                let longitude = location.longitude().await.map_err(location_error)?;
                return Coordinate::new(latitude, longitude).ok_or_else(|| {
                    LocationError::Unavailable(format!(
                        "invalid reading ({latitude}, {longitude})"
                    ))
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl LocationSource for GeoClueSource {
    async fn locate(&mut self) -> Result<Coordinate, LocationError> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.fix()).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        }
    }

    fn describe(&self) -> String {
        format!("geoclue ({})", self.desktop_id)
    }
}

impl Drop for GeoClueSource {
    fn drop(&mut self) {
        let Some((_conn, client)) = self.session.take() else {
            return;
        };
        // Stop is async; best effort when a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.stop().await {
                    tracing::debug!(error = %e, "geoclue client stop failed");
                }
            });
        }
    }
}

fn location_error(e: zbus::Error) -> LocationError {
    if is_access_denied(&e) {
        LocationError::PermissionDenied
    } else {
        LocationError::Unavailable(e.to_string())
    }
}

fn is_access_denied(e: &zbus::Error) -> bool {
    match e {
        zbus::Error::MethodError(name, _, _) => name.as_str().ends_with(".AccessDenied"),
        zbus::Error::FDO(fdo) => matches!(**fdo, zbus::fdo::Error::AccessDenied(_)),
        _ => false,
    }
}
