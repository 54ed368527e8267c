use crate::types::SiteGeofence;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Full pipeline configuration, loaded from TOML and `PUNCHGATE_*` overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PunchConfig {
    pub site: SiteGeofence,
    pub geo: GeoPolicy,
    pub presence: PresencePolicy,
    pub capture: CapturePolicy,
}

impl Default for SiteGeofence {
    fn default() -> Self {
        Self {
            latitude: 13.723,
            longitude: 100.5813,
            radius_m: 200.0,
        }
    }
}

/// Geolocation acquisition and acceptance thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoPolicy {
    /// A sample at or below this accuracy ends acquisition early.
    pub desired_accuracy_m: f64,
    /// Fixes less accurate than this are rejected by the gate.
    pub max_accuracy_m: f64,
    /// Preferred sampling window.
    pub soft_window_ms: u64,
    /// Absolute bound on one acquisition.
    pub hard_timeout_ms: u64,
    /// Per-sample timeout handed to the provider.
    pub sample_timeout_ms: u64,
}

impl Default for GeoPolicy {
    fn default() -> Self {
        Self {
            desired_accuracy_m: 25.0,
            max_accuracy_m: 200.0,
            soft_window_ms: 12_000,
            hard_timeout_ms: 40_000,
            sample_timeout_ms: 12_000,
        }
    }
}

impl GeoPolicy {
    pub fn soft_window(&self) -> Duration {
        Duration::from_millis(self.soft_window_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

/// Face-presence loop tuning. Radii and sizes are fractions of the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresencePolicy {
    pub detection_interval_ms: u64,
    /// Accepted distance of the face center from the frame center.
    pub acceptance_radius: f64,
    /// Multiplier applied to `acceptance_radius`.
    pub radius_slack: f64,
    /// Minimum face size relative to the smaller frame dimension.
    pub min_face_fraction: f64,
    /// Delay after the stream is ready before capture unlocks without a detection.
    pub override_delay_ms: u64,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            detection_interval_ms: 250,
            acceptance_radius: 0.30,
            radius_slack: 1.05,
            min_face_fraction: 0.16,
            override_delay_ms: 2_500,
        }
    }
}

impl PresencePolicy {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn override_delay(&self) -> Duration {
        Duration::from_millis(self.override_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePolicy {
    pub jpeg_quality: u8,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self { jpeg_quality: 92 }
    }
}

impl PunchConfig {
    /// Parse from TOML text. Missing sections and fields take defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply `PUNCHGATE_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&src)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `PUNCHGATE_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override individual fields from `PUNCHGATE_*` variables.
    /// Unparseable values are ignored and leave the field unchanged.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let f64_var = |key: &str, slot: &mut f64| {
            if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
                *slot = v;
            }
        };
        f64_var("PUNCHGATE_SITE_LATITUDE", &mut self.site.latitude);
        f64_var("PUNCHGATE_SITE_LONGITUDE", &mut self.site.longitude);
        f64_var("PUNCHGATE_SITE_RADIUS_M", &mut self.site.radius_m);
        f64_var("PUNCHGATE_DESIRED_ACCURACY_M", &mut self.geo.desired_accuracy_m);
        f64_var("PUNCHGATE_MAX_ACCURACY_M", &mut self.geo.max_accuracy_m);

        let u64_var = |key: &str, slot: &mut u64| {
            if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
                *slot = v;
            }
        };
        u64_var("PUNCHGATE_SOFT_WINDOW_MS", &mut self.geo.soft_window_ms);
        u64_var("PUNCHGATE_HARD_TIMEOUT_MS", &mut self.geo.hard_timeout_ms);
        u64_var("PUNCHGATE_SAMPLE_TIMEOUT_MS", &mut self.geo.sample_timeout_ms);
        u64_var("PUNCHGATE_DETECTION_INTERVAL_MS", &mut self.presence.detection_interval_ms);
        u64_var("PUNCHGATE_OVERRIDE_DELAY_MS", &mut self.presence.override_delay_ms);

        if let Some(q) = lookup("PUNCHGATE_JPEG_QUALITY").and_then(|v| v.parse().ok()) {
            self.capture.jpeg_quality = q;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if !(self.site.radius_m.is_finite() && self.site.radius_m > 0.0) {
            return invalid(format!("site radius must be positive, got {}", self.site.radius_m));
        }
        if !(-90.0..=90.0).contains(&self.site.latitude)
            || !(-180.0..=180.0).contains(&self.site.longitude)
        {
            return invalid(format!(
                "site coordinates out of range: {}, {}",
                self.site.latitude, self.site.longitude
            ));
        }
        if !(self.geo.desired_accuracy_m > 0.0 && self.geo.max_accuracy_m > 0.0) {
            return invalid("accuracy thresholds must be positive".into());
        }
        if self.geo.desired_accuracy_m > self.geo.max_accuracy_m {
            return invalid(format!(
                "desired accuracy {}m is looser than the maximum accepted {}m",
                self.geo.desired_accuracy_m, self.geo.max_accuracy_m
            ));
        }
        if self.geo.hard_timeout_ms <= self.geo.soft_window_ms {
            return invalid(format!(
                "hard timeout {}ms must exceed the soft window {}ms",
                self.geo.hard_timeout_ms, self.geo.soft_window_ms
            ));
        }
        if self.geo.sample_timeout_ms == 0 {
            return invalid("per-sample timeout must be non-zero".into());
        }
        if self.presence.detection_interval_ms == 0 {
            return invalid("detection interval must be non-zero".into());
        }
        if !(self.presence.acceptance_radius > 0.0 && self.presence.radius_slack > 0.0) {
            return invalid("acceptance radius and slack must be positive".into());
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return invalid(format!("jpeg quality must be 1-100, got {}", self.capture.jpeg_quality));
        }
        Ok(())
    }
}
