//! Position provider replaying a recorded sample track from JSON.
//!
//! ```json
//! {
//!   "permission": "granted",
//!   "samples": [
//!     { "after_ms": 800, "latitude": 13.7231, "longitude": 100.5814, "accuracy_m": 48 },
//!     { "after_ms": 900, "latitude": 13.7230, "longitude": 100.5813, "accuracy_m": 14 }
//!   ]
//! }
//! ```
//!
//! `after_ms` is measured from the previous sample. A sample may instead carry
//! `"error": "permission_denied" | "unavailable" | "timeout"`.

use async_trait::async_trait;
use punchgate_hw::{
    GeoProvider, PermissionState, PositionFix, PositionWatch, WatchError, WatchEvent,
    WatchOptions,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackPermission {
    Granted,
    Prompt,
    Denied,
    #[default]
    Unknown,
}

impl From<TrackPermission> for PermissionState {
    fn from(p: TrackPermission) -> Self {
        match p {
            TrackPermission::Granted => PermissionState::Granted,
            TrackPermission::Prompt => PermissionState::Prompt,
            TrackPermission::Denied => PermissionState::Denied,
            TrackPermission::Unknown => PermissionState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackError {
    PermissionDenied,
    Unavailable,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TrackSample {
    Fix {
        #[serde(default)]
        after_ms: u64,
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
    },
    Error {
        #[serde(default)]
        after_ms: u64,
        error: TrackError,
    },
}

impl TrackSample {
    fn delay(&self) -> Duration {
        match self {
            TrackSample::Fix { after_ms, .. } | TrackSample::Error { after_ms, .. } => {
                Duration::from_millis(*after_ms)
            }
        }
    }

    fn to_event(&self) -> WatchEvent {
        match *self {
            TrackSample::Fix {
                latitude,
                longitude,
                accuracy_m,
                ..
            } => Ok(PositionFix {
                latitude,
                longitude,
                accuracy_m,
                captured_at_ms: chrono::Utc::now().timestamp_millis(),
            }),
            TrackSample::Error { error, .. } => Err(match error {
                TrackError::PermissionDenied => WatchError::PermissionDenied,
                TrackError::Unavailable => {
                    WatchError::PositionUnavailable("track reported no position".into())
                }
                TrackError::Timeout => WatchError::Timeout,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SampleTrack {
    /// Whether the device can read its location at all.
    pub available: bool,
    pub permission: TrackPermission,
    pub samples: Vec<TrackSample>,
}

impl Default for SampleTrack {
    fn default() -> Self {
        Self {
            available: true,
            permission: TrackPermission::Unknown,
            samples: Vec::new(),
        }
    }
}

impl SampleTrack {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&src)?)
    }
}

#[async_trait]
impl GeoProvider for SampleTrack {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn permission(&self) -> PermissionState {
        self.permission.into()
    }

    fn watch(&self, options: WatchOptions) -> Result<PositionWatch, WatchError> {
        tracing::debug!(
            samples = self.samples.len(),
            timeout_ms = options.timeout_ms,
            "replaying sample track"
        );
        let samples = self.samples.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            for sample in samples {
                tokio::time::sleep(sample.delay()).await;
                if tx.send(sample.to_event()).is_err() {
                    break;
                }
            }
        });
        Ok(PositionWatch::new(rx, move || task.abort()))
    }
}
