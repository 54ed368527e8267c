//! Failure taxonomy and the recovery actions offered to the user.

use serde::Serialize;

/// What went wrong, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    DeviceUnavailable,
    Timeout,
    OutOfRange,
    /// A fix arrived but its accuracy was too coarse to judge.
    PoorSignal,
    TransientInferenceError,
    SaveFailed,
}

/// Something the user can do next. Failures on the punch flow carry the
/// actions that apply where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    OpenCamera,
    UploadFile,
    RecheckLocation,
    RetrySave,
    Retake,
}

impl FailureKind {
    /// Everything except a missing device can be fixed by retrying or moving.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FailureKind::DeviceUnavailable)
    }
}
