use anyhow::{bail, Context, Result};
use facesense_core::{Acquisition, Coordinate, LocationConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where the kiosk's position comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    /// GeoClue2 over the system bus.
    Geoclue,
    /// `latitude`/`longitude` from configuration.
    Fixed,
    /// Never attach a coordinate.
    None,
}

impl FromStr for LocationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geoclue" => Ok(LocationMode::Geoclue),
            "fixed" => Ok(LocationMode::Fixed),
            "none" | "off" => Ok(LocationMode::None),
            other => Err(format!("unknown location mode: {other}")),
        }
    }
}

/// Kiosk configuration: optional TOML file, then `FACESENSE_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the attendance backend.
    pub gateway_url: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// V4L2 device path.
    pub camera_device: String,
    /// JPEG quality for submitted frames (1-100).
    pub jpeg_quality: u8,
    /// Frames discarded after the stream starts while exposure settles.
    pub camera_warmup_frames: usize,
    pub location: LocationMode,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Re-read the position every N seconds; 0 reads it once.
    pub location_refresh_secs: u64,
    /// Fixes older than this are stale; 0 disables staleness.
    pub location_max_age_secs: u64,
    /// How long a single GeoClue reading may take.
    pub location_timeout_secs: u64,
    pub geoclue_desktop_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:5000".to_string(),
            request_timeout_secs: 15,
            camera_device: "/dev/video0".to_string(),
            jpeg_quality: facesense_hw::DEFAULT_JPEG_QUALITY,
            camera_warmup_frames: facesense_hw::DEFAULT_WARMUP_FRAMES,
            location: LocationMode::Geoclue,
            latitude: None,
            longitude: None,
            location_refresh_secs: 0,
            location_max_age_secs: 300,
            location_timeout_secs: 30,
            geoclue_desktop_id: "facesense".to_string(),
        }
    }
}

impl Config {
    /// Load from `explicit`, else `FACESENSE_CONFIG`, else the XDG default
    /// path, then apply environment overrides.
    ///
    /// A missing file at the default path is not an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACESENSE_CONFIG").ok().map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse config {}", path.display()))
    }

    /// Apply `FACESENSE_*` variables. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("FACESENSE_GATEWAY_URL") {
            self.gateway_url = url;
        }
        if let Some(device) = var("FACESENSE_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(id) = var("FACESENSE_GEOCLUE_DESKTOP_ID") {
            self.geoclue_desktop_id = id;
        }
        override_parsed(&var, "FACESENSE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_parsed(&var, "FACESENSE_JPEG_QUALITY", &mut self.jpeg_quality);
        override_parsed(&var, "FACESENSE_WARMUP_FRAMES", &mut self.camera_warmup_frames);
        override_parsed(&var, "FACESENSE_LOCATION", &mut self.location);
        override_parsed(&var, "FACESENSE_LOCATION_REFRESH_SECS", &mut self.location_refresh_secs);
        override_parsed(&var, "FACESENSE_LOCATION_MAX_AGE_SECS", &mut self.location_max_age_secs);
        override_parsed(&var, "FACESENSE_LOCATION_TIMEOUT_SECS", &mut self.location_timeout_secs);
        if let Some(lat) = env_parse(&var, "FACESENSE_LATITUDE") {
            self.latitude = Some(lat);
        }
        if let Some(lon) = env_parse(&var, "FACESENSE_LONGITUDE") {
            self.longitude = Some(lon);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg_quality must be between 1 and 100, got {}", self.jpeg_quality);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if self.location_timeout_secs == 0 {
            bail!("location_timeout_secs must be at least 1");
        }
        if self.location == LocationMode::Fixed {
            self.fixed_coordinate()?;
        }
        Ok(())
    }

    /// The configured kiosk position for `location = "fixed"`.
    pub fn fixed_coordinate(&self) -> Result<Coordinate> {
        let (Some(lat), Some(lon)) = (self.latitude, self.longitude) else {
            bail!("location = \"fixed\" requires latitude and longitude");
        };
        Coordinate::new(lat, lon)
            .with_context(|| format!("invalid fixed coordinate ({lat}, {lon})"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn location_config(&self) -> LocationConfig {
        let acquisition = match self.location_refresh_secs {
            0 => Acquisition::Once,
            secs => Acquisition::Watch {
                interval: Duration::from_secs(secs),
            },
        };
        let max_age = match self.location_max_age_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        LocationConfig {
            acquisition,
            max_age,
        }
    }
}

fn default_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facesense/config.toml")
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn override_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = env_parse(var, key) {
        *slot = value;
    }
}
