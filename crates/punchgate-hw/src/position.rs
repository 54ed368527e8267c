//! Position provider contract and the scoped watch handle.
//!
//! A provider hands out a [`PositionWatch`]: a stream of samples plus a
//! release hook. Dropping or clearing the watch runs the hook exactly once,
//! which is how callers guarantee no watch survives its owner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// One position sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Uncertainty radius in meters; smaller is better.
    pub accuracy_m: f64,
    /// Wall-clock time the sample was taken, milliseconds since the Unix epoch.
    pub captured_at_ms: i64,
}

impl PositionFix {
    /// Accuracy usable for ranking. Missing or nonsensical values rank last.
    pub fn ranking_accuracy(&self) -> f64 {
        if self.accuracy_m.is_finite() && self.accuracy_m >= 0.0 {
            self.accuracy_m
        } else {
            f64::INFINITY
        }
    }
}

/// Permission state as reported by the platform, when it can report it at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
    #[default]
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("position request timed out")]
    Timeout,
}

/// Sampling options passed through to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Oldest cached sample the provider may return; 0 forces fresh samples.
    pub maximum_age_ms: u64,
    /// Per-sample timeout the provider may enforce on its own.
    pub timeout_ms: u64,
}

pub type WatchEvent = Result<PositionFix, WatchError>;

/// A live position watch.
pub struct PositionWatch {
    samples: mpsc::UnboundedReceiver<WatchEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PositionWatch {
    pub fn new(
        samples: mpsc::UnboundedReceiver<WatchEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            samples,
            release: Some(Box::new(release)),
        }
    }

    /// Next sample or sampling error. `None` once the provider stops sending.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        if self.release.is_none() {
            return None;
        }
        self.samples.recv().await
    }

    /// Stop sampling. Safe to call repeatedly; the release hook runs once.
    pub fn clear(&mut self) {
        if let Some(release) = self.release.take() {
            self.samples.close();
            release();
            tracing::debug!("position watch cleared");
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Source of device position.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Whether the platform offers location at all.
    fn is_available(&self) -> bool;

    /// Current permission state. Platforms that cannot tell return `Unknown`.
    async fn permission(&self) -> PermissionState {
        PermissionState::Unknown
    }

    /// Begin continuous sampling.
    fn watch(&self, options: WatchOptions) -> Result<PositionWatch, WatchError>;
}
