//! Device geolocation, acquired in the background.
//!
//! A [`LocationProvider`] drives a [`LocationSource`] on a tokio task and
//! publishes every reading on a watch channel. Callers never wait on it:
//! `current()` answers immediately with the latest fresh fix, if any.

use crate::types::Coordinate;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Fixes older than this are reported stale unless configured otherwise.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location request timed out")]
    Timeout,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Something that can produce the device's position.
pub trait LocationSource: Send + 'static {
    fn locate(&mut self) -> impl Future<Output = Result<Coordinate, LocationError>> + Send;

    fn describe(&self) -> String {
        "location source".to_string()
    }
}

/// A kiosk with a known, fixed position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinate);

impl LocationSource for FixedLocation {
    async fn locate(&mut self) -> Result<Coordinate, LocationError> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        format!("fixed {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub acquired_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationStatus {
    /// No reading yet.
    Pending,
    Available(LocationFix),
    Unavailable(String),
}

/// How often the source is asked for a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    /// A single reading.
    Once,
    /// Re-read every `interval`.
    Watch { interval: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct LocationConfig {
    pub acquisition: Acquisition,
    /// `None` disables staleness.
    pub max_age: Option<Duration>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            acquisition: Acquisition::Once,
            max_age: Some(DEFAULT_MAX_AGE),
        }
    }
}

/// Background location subscription. Dropping it cancels acquisition.
pub struct LocationProvider {
    rx: watch::Receiver<LocationStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
    max_age: Option<Duration>,
}

impl LocationProvider {
    /// Spawn acquisition on the current tokio runtime and return immediately.
    pub fn start<S: LocationSource>(source: S, config: LocationConfig) -> Self {
        let (tx, rx) = watch::channel(LocationStatus::Pending);
        tracing::info!(source = %source.describe(), acquisition = ?config.acquisition, "location provider started");
        let task = tokio::spawn(acquire_loop(source, config.acquisition, tx));
        Self {
            rx,
            task: Mutex::new(Some(task)),
            max_age: config.max_age,
        }
    }

    /// A provider with no source, e.g. when location is disabled.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let (_tx, rx) = watch::channel(LocationStatus::Unavailable(reason.into()));
        Self {
            rx,
            task: Mutex::new(None),
            max_age: None,
        }
    }

    /// Latest fresh coordinate, or `None` when pending, failed, or stale.
    pub fn current(&self) -> Option<Coordinate> {
        match &*self.rx.borrow() {
            LocationStatus::Available(fix) if !self.is_stale(fix) => Some(fix.coordinate),
            _ => None,
        }
    }

    pub fn status(&self) -> LocationStatus {
        self.rx.borrow().clone()
    }

    /// Operator-facing text, `None` while a fresh fix is available.
    pub fn status_message(&self) -> Option<String> {
        match &*self.rx.borrow() {
            LocationStatus::Pending => Some("Requesting location...".to_string()),
            LocationStatus::Available(fix) if self.is_stale(fix) => {
                Some("Location stale".to_string())
            }
            LocationStatus::Available(_) => None,
            LocationStatus::Unavailable(reason) => {
                Some(format!("Location not available: {reason}"))
            }
        }
    }

    /// Receiver notified on every new reading.
    pub fn subscribe(&self) -> watch::Receiver<LocationStatus> {
        self.rx.clone()
    }

    /// Cancel background acquisition. Idempotent.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!("location provider stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    fn is_stale(&self, fix: &LocationFix) -> bool {
        self.max_age
            .is_some_and(|max_age| fix.acquired_at.elapsed() > max_age)
    }
}

impl Drop for LocationProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn acquire_loop<S: LocationSource>(
    mut source: S,
    acquisition: Acquisition,
    tx: watch::Sender<LocationStatus>,
) {
    let label = source.describe();
    loop {
        let status = match source.locate().await {
            Ok(coordinate) => {
                tracing::debug!(source = %label, %coordinate, "location fix");
                LocationStatus::Available(LocationFix {
                    coordinate,
                    acquired_at: Instant::now(),
                })
            }
            Err(e) => {
                tracing::warn!(source = %label, error = %e, "location unavailable");
                LocationStatus::Unavailable(e.to_string())
            }
        };
        tx.send_replace(status);

        match acquisition {
            Acquisition::Once => break,
            Acquisition::Watch { interval } => tokio::time::sleep(interval).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedLocation(VecDeque<Result<Coordinate, LocationError>>);

    impl LocationSource for ScriptedLocation {
        async fn locate(&mut self) -> Result<Coordinate, LocationError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(LocationError::Unavailable("no more readings".into())))
        }
    }

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    async fn next_status(rx: &mut watch::Receiver<LocationStatus>) -> LocationStatus {
        rx.changed().await.unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn test_fixed_location_becomes_available() {
        let provider = LocationProvider::start(
            FixedLocation(coord(40.0, -75.0)),
            LocationConfig::default(),
        );
        let mut rx = provider.subscribe();
        next_status(&mut rx).await;
        assert_eq!(provider.current(), Some(coord(40.0, -75.0)));
        assert_eq!(provider.status_message(), None);
    }

    #[tokio::test]
    async fn test_start_does_not_block_on_source() {
        let provider = LocationProvider::start(
            FixedLocation(coord(40.0, -75.0)),
            LocationConfig::default(),
        );
        // No await yet: the task has not run.
        assert_eq!(provider.status(), LocationStatus::Pending);
        assert_eq!(provider.current(), None);
        assert_eq!(
            provider.status_message().as_deref(),
            Some("Requesting location...")
        );
    }

    #[tokio::test]
    async fn test_permission_denied_is_unavailable() {
        let provider = LocationProvider::start(
            ScriptedLocation(VecDeque::from([Err(LocationError::PermissionDenied)])),
            LocationConfig::default(),
        );
        let mut rx = provider.subscribe();
        let status = next_status(&mut rx).await;
        assert!(matches!(status, LocationStatus::Unavailable(_)));
        assert_eq!(provider.current(), None);
        assert_eq!(
            provider.status_message().as_deref(),
            Some("Location not available: location permission denied")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_goes_stale() {
        let provider = LocationProvider::start(
            FixedLocation(coord(40.0, -75.0)),
            LocationConfig {
                acquisition: Acquisition::Once,
                max_age: Some(Duration::from_secs(60)),
            },
        );
        let mut rx = provider.subscribe();
        next_status(&mut rx).await;
        assert!(provider.current().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(provider.current(), None);
        assert_eq!(provider.status_message().as_deref(), Some("Location stale"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_mode_refreshes() {
        let provider = LocationProvider::start(
            ScriptedLocation(VecDeque::from([
                Ok(coord(40.0, -75.0)),
                Ok(coord(40.001, -75.002)),
            ])),
            LocationConfig {
                acquisition: Acquisition::Watch {
                    interval: Duration::from_secs(10),
                },
                max_age: None,
            },
        );
        let mut rx = provider.subscribe();
        next_status(&mut rx).await;
        assert_eq!(provider.current(), Some(coord(40.0, -75.0)));

        next_status(&mut rx).await;
        assert_eq!(provider.current(), Some(coord(40.001, -75.002)));
    }

    #[tokio::test]
    async fn test_stop_cancels_acquisition() {
        let provider = LocationProvider::start(
            ScriptedLocation(VecDeque::new()),
            LocationConfig {
                acquisition: Acquisition::Watch {
                    interval: Duration::from_secs(3600),
                },
                max_age: None,
            },
        );
        let mut rx = provider.subscribe();
        next_status(&mut rx).await;

        provider.stop();
        assert!(provider.is_stopped());
        // The aborted task drops its sender.
        assert!(rx.changed().await.is_err());
        provider.stop();
    }

    #[test]
    fn test_unavailable_provider() {
        let provider = LocationProvider::unavailable("location disabled");
        assert_eq!(provider.current(), None);
        assert!(provider.is_stopped());
        assert_eq!(
            provider.status_message().as_deref(),
            Some("Location not available: location disabled")
        );
    }
}
