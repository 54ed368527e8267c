//! punchgate-core — location-gated identity capture.
//!
//! A punch (clock-in or clock-out) needs a face photo and a position inside
//! the worksite geofence. This crate runs the face-presence loop that gates
//! capture, samples geolocation for the best fix, judges it against the site
//! and sequences the save, discarding results that a retake or a newer
//! attempt has superseded.

pub mod acquire;
pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod flow;
pub mod gate;
pub mod presence;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use acquire::{acquire_best_fix, AcquireError, AcquireOptions};
pub use capture::{CaptureController, CaptureError, CaptureReadiness, CapturedImage, ImageSource};
pub use config::{CapturePolicy, ConfigError, GeoPolicy, PresencePolicy, PunchConfig};
pub use detector::{detector_or_manual, Candidate, DetectorError, FaceDetector};
pub use error::{FailureKind, RecoveryAction};
pub use flow::{
    CaptureStep, FlowError, FlowFailure, FlowPhase, FlowSnapshot, PunchCollaborators, PunchFlow,
    PunchNavigator, PunchSaver, SaveError,
};
pub use gate::{GateStatus, LocationGateResult};
pub use presence::{PresenceMessage, PresenceStatus};
pub use token::{RequestCounter, RequestToken};
pub use types::{DetectionBox, PunchType, RawBox, SiteGeofence};
