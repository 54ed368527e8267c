//! Punch state machine.
//!
//! Sequences capture → location gate → save → success. Location checks and
//! saves are tagged with request tokens; a result whose token was superseded
//! by a newer launch, a retake or a punch-type change is dropped without
//! touching visible state.
//!
//! At most one location attempt holds a position watch. Starting a check
//! cancels the previous attempt and waits for its watch to be released;
//! retake and a punch-type change cancel the running attempt outright.

use crate::acquire::{acquire_best_fix, AcquireOptions};
use crate::capture::{CaptureController, CaptureError, CaptureReadiness, CapturedImage, ImageSource};
use crate::config::PunchConfig;
use crate::detector::FaceDetector;
use crate::error::{FailureKind, RecoveryAction};
use crate::gate::{self, LocationGateResult};
use crate::token::RequestCounter;
use crate::types::PunchType;
use async_trait::async_trait;
use punchgate_hw::{CameraBackend, CameraError, GeoProvider};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("save rejected: {0}")]
    Rejected(String),
    #[error("save failed: {0}")]
    Failed(String),
}

/// Persists a punch. Called again with the same image on retry.
#[async_trait]
pub trait PunchSaver: Send + Sync {
    async fn save(&self, image_data_url: &str, punch_type: PunchType) -> Result<(), SaveError>;
}

/// Told once when a punch has been saved.
pub trait PunchNavigator: Send + Sync {
    fn punch_succeeded(&self, punch_type: PunchType);
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("only available while capturing")]
    NotCapturing,
    #[error("camera is already opening")]
    Busy,
    #[error("a save is in progress")]
    Saving,
    #[error("punch already recorded")]
    Finished,
    #[error("no captured image")]
    NoImage,
    #[error("nothing to retry")]
    NothingToRetry,
    #[error("image was captured for {captured}, punch type is now {current}")]
    PunchTypeMismatch {
        captured: PunchType,
        current: PunchType,
    },
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStep {
    Capture,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Capture,
    CheckingLocation,
    Saving,
    Succeeded,
    AwaitingLocationRetry,
    AwaitingSaveRetry,
}

/// A failure shown to the user with its way out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowFailure {
    pub kind: FailureKind,
    pub hint: String,
    pub actions: Vec<RecoveryAction>,
}

impl FlowFailure {
    fn camera(err: &CameraError) -> Self {
        match err {
            CameraError::PermissionDenied => Self {
                kind: FailureKind::PermissionDenied,
                hint: "Camera access was denied. Allow camera access and try again, or upload a photo instead."
                    .to_string(),
                actions: vec![RecoveryAction::OpenCamera, RecoveryAction::UploadFile],
            },
            CameraError::DeviceUnavailable(_) => Self {
                kind: FailureKind::DeviceUnavailable,
                hint: "No camera is available on this device. Upload a photo instead.".to_string(),
                actions: vec![RecoveryAction::UploadFile],
            },
        }
    }

    fn location(result: &LocationGateResult) -> Option<Self> {
        let kind = result.failure_kind()?;
        Some(Self {
            kind,
            hint: result.hint.clone(),
            actions: vec![RecoveryAction::RecheckLocation, RecoveryAction::Retake],
        })
    }

    fn save(err: &SaveError) -> Self {
        Self {
            kind: FailureKind::SaveFailed,
            hint: format!("Could not record your punch ({err}). Please try again."),
            actions: vec![RecoveryAction::RetrySave, RecoveryAction::Retake],
        }
    }
}

/// Everything a front end needs to render the flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSnapshot {
    pub punch_type: PunchType,
    pub step: CaptureStep,
    pub phase: FlowPhase,
    pub image_source: Option<ImageSource>,
    pub location: Option<LocationGateResult>,
    pub fix_summary: Option<String>,
    pub failure: Option<FlowFailure>,
    /// Out-of-area notice visibility.
    pub notice_open: bool,
    pub camera: Option<CaptureReadiness>,
    pub actions: Vec<RecoveryAction>,
}

/// External collaborators a flow is wired to.
pub struct PunchCollaborators {
    pub camera: Arc<dyn CameraBackend>,
    pub detector: Option<Arc<dyn FaceDetector>>,
    pub geo: Arc<dyn GeoProvider>,
    pub saver: Arc<dyn PunchSaver>,
    pub navigator: Arc<dyn PunchNavigator>,
}

struct FlowState {
    punch_type: PunchType,
    step: CaptureStep,
    phase: FlowPhase,
    image: Option<CapturedImage>,
    location: Option<LocationGateResult>,
    failure: Option<FlowFailure>,
    notice_open: bool,
    camera_opening: bool,
    location_requests: RequestCounter,
    save_requests: RequestCounter,
    /// Cancels the running location attempt.
    location_cancel: CancellationToken,
}

impl FlowState {
    fn new(punch_type: PunchType) -> Self {
        Self {
            punch_type,
            step: CaptureStep::Capture,
            phase: FlowPhase::Capture,
            image: None,
            location: None,
            failure: None,
            notice_open: false,
            camera_opening: false,
            location_requests: RequestCounter::new(),
            save_requests: RequestCounter::new(),
            location_cancel: CancellationToken::new(),
        }
    }

    /// Back to `capture`, retiring every outstanding request.
    fn reset(&mut self) {
        self.location_cancel.cancel();
        self.location_requests.invalidate();
        self.save_requests.invalidate();
        self.step = CaptureStep::Capture;
        self.phase = FlowPhase::Capture;
        self.image = None;
        self.location = None;
        self.failure = None;
        self.notice_open = false;
    }
}

/// One punch attempt. Create a fresh flow each time the punch screen is entered.
pub struct PunchFlow {
    config: PunchConfig,
    geo: Arc<dyn GeoProvider>,
    saver: Arc<dyn PunchSaver>,
    navigator: Arc<dyn PunchNavigator>,
    camera: CaptureController,
    state: Mutex<FlowState>,
    /// Held by the location attempt that owns the position watch.
    geo_slot: tokio::sync::Mutex<()>,
}

/// Clears the camera-opening mark however the open ends.
struct OpeningMark<'a>(&'a PunchFlow);

impl Drop for OpeningMark<'_> {
    fn drop(&mut self) {
        self.0.state().camera_opening = false;
    }
}

impl PunchFlow {
    pub fn new(config: PunchConfig, collaborators: PunchCollaborators, punch_type: PunchType) -> Self {
        let camera = CaptureController::new(
            collaborators.camera,
            collaborators.detector,
            config.presence.clone(),
            config.capture.clone(),
        );
        Self {
            config,
            geo: collaborators.geo,
            saver: collaborators.saver,
            navigator: collaborators.navigator,
            camera,
            state: Mutex::new(FlowState::new(punch_type)),
            geo_slot: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn punch_type(&self) -> PunchType {
        self.state().punch_type
    }

    pub fn camera(&self) -> &CaptureController {
        &self.camera
    }

    /// Open the camera. Only allowed in `capture` while no open is pending.
    pub async fn open_camera(&self) -> Result<(), FlowError> {
        {
            let mut state = self.state();
            if state.step != CaptureStep::Capture {
                return Err(FlowError::NotCapturing);
            }
            if state.camera_opening {
                return Err(FlowError::Busy);
            }
            state.camera_opening = true;
            state.failure = None;
        }
        let _mark = OpeningMark(self);

        match self.camera.open().await {
            Ok(()) => Ok(()),
            Err(CaptureError::Camera(err)) => {
                let mut state = self.state();
                if state.step == CaptureStep::Capture {
                    state.failure = Some(FlowFailure::camera(&err));
                }
                Err(CaptureError::Camera(err).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Take a still from the live camera and run the punch pipeline on it.
    pub async fn capture(&self) -> Result<(), FlowError> {
        let punch_type = {
            let state = self.state();
            if state.step != CaptureStep::Capture {
                return Err(FlowError::NotCapturing);
            }
            state.punch_type
        };
        let image = self.camera.capture_still(punch_type)?;
        self.on_capture(image).await
    }

    /// Use an uploaded image file instead of the camera.
    pub async fn upload(&self, bytes: &[u8]) -> Result<(), FlowError> {
        let punch_type = {
            let state = self.state();
            if state.step != CaptureStep::Capture {
                return Err(FlowError::NotCapturing);
            }
            state.punch_type
        };
        let image = CapturedImage::from_upload(bytes, punch_type)?;
        self.camera.close();
        self.on_capture(image).await
    }

    /// Accept a captured image: move to `confirm` and gate on location.
    ///
    /// An image taken for a punch type other than the current one is discarded.
    pub async fn on_capture(&self, image: CapturedImage) -> Result<(), FlowError> {
        {
            let mut state = self.state();
            if image.punch_type != state.punch_type {
                tracing::warn!(
                    captured = %image.punch_type,
                    current = %state.punch_type,
                    "discarding capture for a stale punch type"
                );
                return Err(FlowError::PunchTypeMismatch {
                    captured: image.punch_type,
                    current: state.punch_type,
                });
            }
            if state.step != CaptureStep::Capture {
                return Err(FlowError::NotCapturing);
            }
            tracing::info!(source = ?image.source, punch = %image.punch_type, "image captured");
            state.step = CaptureStep::Confirm;
            state.image = Some(image);
            state.failure = None;
        }
        self.camera.close();
        self.run_location_check().await
    }

    /// Run the location gate again for the captured image.
    pub async fn recheck_location(&self) -> Result<(), FlowError> {
        {
            let state = self.state();
            if state.image.is_none() {
                return Err(FlowError::NoImage);
            }
            match state.phase {
                FlowPhase::Saving => return Err(FlowError::Saving),
                FlowPhase::Succeeded => return Err(FlowError::Finished),
                _ => {}
            }
        }
        self.run_location_check().await
    }

    /// Re-send the same image after a failed save.
    pub async fn retry_save(&self) -> Result<(), FlowError> {
        {
            let state = self.state();
            if state.phase != FlowPhase::AwaitingSaveRetry {
                return Err(FlowError::NothingToRetry);
            }
        }
        self.run_save().await
    }

    async fn run_location_check(&self) -> Result<(), FlowError> {
        let (token, cancel) = {
            let mut state = self.state();
            state.location_cancel.cancel();
            state.location_cancel = CancellationToken::new();
            let token = state.location_requests.bump();
            state.save_requests.invalidate();
            state.phase = FlowPhase::CheckingLocation;
            state.location = None;
            state.failure = None;
            (token, state.location_cancel.clone())
        };
        tracing::info!("checking location");

        let opts = AcquireOptions::from(&self.config.geo);
        let outcome = {
            // Wait for the previous attempt to drop its watch.
            let _slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                slot = self.geo_slot.lock() => slot,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("location check cancelled");
                    return Ok(());
                }
                outcome = acquire_best_fix(self.geo.as_ref(), &opts) => outcome,
            }
        };
        let result = gate::evaluate(&outcome, &self.config.site, self.config.geo.max_accuracy_m);

        {
            let mut state = self.state();
            if !state.location_requests.is_current(token) {
                tracing::warn!(status = ?result.status, "discarding superseded location result");
                return Ok(());
            }
            tracing::info!(status = ?result.status, distance_m = ?result.distance_m, "location gate");
            state.failure = FlowFailure::location(&result);
            state.notice_open = !result.is_allowed();
            state.phase = if result.is_allowed() {
                FlowPhase::Saving
            } else {
                FlowPhase::AwaitingLocationRetry
            };
            let allowed = result.is_allowed();
            state.location = Some(result);
            if !allowed {
                return Ok(());
            }
        }
        self.run_save().await
    }

    async fn run_save(&self) -> Result<(), FlowError> {
        let (token, image, punch_type) = {
            let mut state = self.state();
            let image = state.image.clone().ok_or(FlowError::NoImage)?;
            let token = state.save_requests.bump();
            state.phase = FlowPhase::Saving;
            state.failure = None;
            (token, image, state.punch_type)
        };
        tracing::info!(punch = %punch_type, "saving punch");

        let outcome = self.saver.save(&image.data_url, punch_type).await;

        {
            let mut state = self.state();
            if !state.save_requests.is_current(token) {
                tracing::warn!(ok = outcome.is_ok(), "discarding superseded save result");
                return Ok(());
            }
            match &outcome {
                Ok(()) => {
                    state.phase = FlowPhase::Succeeded;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "punch save failed");
                    state.phase = FlowPhase::AwaitingSaveRetry;
                    state.failure = Some(FlowFailure::save(err));
                    return Ok(());
                }
            }
        }

        tracing::info!(punch = %punch_type, "punch recorded");
        self.navigator.punch_succeeded(punch_type);
        Ok(())
    }

    /// Drop the image, release the camera and return to `capture`.
    /// A running location check is cancelled and an in-flight save's result
    /// is discarded when it lands.
    pub fn retake(&self) {
        self.state().reset();
        self.camera.close();
        tracing::info!("retake");
    }

    /// Switch between clock-in and clock-out. Changing the type resets the flow.
    pub fn set_punch_type(&self, punch_type: PunchType) {
        {
            let mut state = self.state();
            if state.punch_type == punch_type {
                return;
            }
            state.reset();
            state.punch_type = punch_type;
        }
        self.camera.close();
        tracing::info!(punch = %punch_type, "punch type changed");
    }

    pub fn dismiss_notice(&self) {
        self.state().notice_open = false;
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let mut snapshot = {
            let state = self.state();
            FlowSnapshot {
                punch_type: state.punch_type,
                step: state.step,
                phase: state.phase,
                image_source: state.image.as_ref().map(|i| i.source),
                fix_summary: state.location.as_ref().and_then(|l| l.fix_summary()),
                location: state.location.clone(),
                failure: state.failure.clone(),
                notice_open: state.notice_open,
                camera: None,
                actions: Vec::new(),
            }
        };
        snapshot.camera = self.camera.readiness();
        snapshot.actions = available_actions(&snapshot);
        snapshot
    }
}

fn available_actions(snapshot: &FlowSnapshot) -> Vec<RecoveryAction> {
    if let Some(failure) = &snapshot.failure {
        return failure.actions.clone();
    }
    match snapshot.phase {
        FlowPhase::Capture if snapshot.camera.is_some() => vec![RecoveryAction::UploadFile],
        FlowPhase::Capture => vec![RecoveryAction::OpenCamera, RecoveryAction::UploadFile],
        FlowPhase::CheckingLocation | FlowPhase::Saving => vec![RecoveryAction::Retake],
        FlowPhase::AwaitingLocationRetry => {
            vec![RecoveryAction::RecheckLocation, RecoveryAction::Retake]
        }
        FlowPhase::AwaitingSaveRetry => vec![RecoveryAction::RetrySave, RecoveryAction::Retake],
        FlowPhase::Succeeded => Vec::new(),
    }
}
