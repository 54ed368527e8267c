//! Location gate: turns an acquisition outcome into a user-facing verdict.

use crate::acquire::AcquireError;
use crate::error::FailureKind;
use crate::types::SiteGeofence;
use chrono::{DateTime, Utc};
use punchgate_hw::PositionFix;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Allowed,
    Outside,
    Blocked,
    Unavailable,
    Error,
}

/// Outcome of one location-gate attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationGateResult {
    pub status: GateStatus,
    /// Plain-language explanation for the user.
    pub hint: String,
    pub fix: Option<PositionFix>,
    /// Distance from the site center, when a fix exists.
    pub distance_m: Option<f64>,
    /// Failure category, `None` when allowed.
    pub kind: Option<FailureKind>,
    pub checked_at: DateTime<Utc>,
}

impl LocationGateResult {
    pub fn is_allowed(&self) -> bool {
        self.status == GateStatus::Allowed
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.kind
    }

    /// Compact one-line fix summary: coordinates, rounded accuracy and distance.
    pub fn fix_summary(&self) -> Option<String> {
        let fix = self.fix?;
        let distance = self.distance_m.unwrap_or(0.0);
        Some(format!(
            "lat: {:.6} | lng: {:.6} | acc: {} | dist: {}",
            fix.latitude,
            fix.longitude,
            approx_m(fix.accuracy_m),
            approx_m(distance)
        ))
    }

    fn new(
        status: GateStatus,
        kind: Option<FailureKind>,
        hint: String,
        fix: Option<PositionFix>,
        distance_m: Option<f64>,
    ) -> Self {
        Self {
            status,
            hint,
            fix,
            distance_m,
            kind,
            checked_at: Utc::now(),
        }
    }
}

/// `~12m`, or `unknown` for a non-finite measurement.
fn approx_m(v: f64) -> String {
    if v.is_finite() {
        format!("~{}m", v.round() as i64)
    } else {
        "unknown".to_string()
    }
}

/// Judge a fix against the site.
///
/// `allowed` iff the fix is within `max_accuracy_m` and inside the radius.
/// A fix that is too imprecise is an `error` regardless of distance.
pub fn evaluate_fix(fix: PositionFix, site: &SiteGeofence, max_accuracy_m: f64) -> LocationGateResult {
    let distance = site.distance_to(&fix);
    let accuracy = approx_m(fix.accuracy_m);
    let dist = approx_m(distance);
    let radius = site.radius_m.round() as i64;

    if fix.ranking_accuracy() > max_accuracy_m {
        return LocationGateResult::new(
            GateStatus::Error,
            Some(FailureKind::PoorSignal),
            format!(
                "GPS signal not good enough (accuracy {accuracy}). Move to an open area or turn on Wi-Fi, then check your location again."
            ),
            Some(fix),
            Some(distance),
        );
    }

    if site.contains_distance(distance) {
        LocationGateResult::new(
            GateStatus::Allowed,
            None,
            format!("Inside the work area (distance {dist}, limit {radius}m, accuracy {accuracy})."),
            Some(fix),
            Some(distance),
        )
    } else {
        LocationGateResult::new(
            GateStatus::Outside,
            Some(FailureKind::OutOfRange),
            format!(
                "Outside the work area (distance {dist}, limit {radius}m, accuracy {accuracy}). Move closer to the site and check your location again."
            ),
            Some(fix),
            Some(distance),
        )
    }
}

/// Verdict for an acquisition that produced no fix.
pub fn from_acquire_error(err: &AcquireError) -> LocationGateResult {
    let (status, kind, hint) = match err {
        AcquireError::Blocked => (
            GateStatus::Blocked,
            FailureKind::PermissionDenied,
            "Location access is not allowed. Turn on location services and grant permission (a secure connection is required), then check again.",
        ),
        AcquireError::Unavailable => (
            GateStatus::Unavailable,
            FailureKind::DeviceUnavailable,
            "This device or browser cannot read its location.",
        ),
        AcquireError::Timeout | AcquireError::Failed(_) => (
            GateStatus::Error,
            FailureKind::Timeout,
            "Could not read your location (timeout or weak signal). Please try again.",
        ),
    };
    LocationGateResult::new(status, Some(kind), hint.to_string(), None, None)
}

/// Full gate: acquisition outcome in, verdict out.
pub fn evaluate(
    outcome: &Result<PositionFix, AcquireError>,
    site: &SiteGeofence,
    max_accuracy_m: f64,
) -> LocationGateResult {
    match outcome {
        Ok(fix) => evaluate_fix(*fix, site, max_accuracy_m),
        Err(err) => from_acquire_error(err),
    }
}
