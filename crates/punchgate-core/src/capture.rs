//! Capture surface: camera stream, presence loop and still capture.
//!
//! At most one stream is live per controller. Opening again, closing, taking
//! a still and dropping the controller all release the previous stream and
//! stop its presence loop. A stream that finishes opening after the surface
//! was closed or reopened is stopped on arrival.

use crate::config::{CapturePolicy, PresencePolicy};
use crate::detector::FaceDetector;
use crate::presence::{run_presence_loop, PresenceMessage, PresenceStatus};
use crate::types::PunchType;
use punchgate_hw::frame::{encode_jpeg_data_url, file_to_data_url};
use punchgate_hw::{CameraBackend, CameraError, Facing, FrameError, StreamGuard};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("camera is not open")]
    NotOpen,
    #[error("camera stream is not ready yet")]
    NotReady,
    #[error("no face detected yet")]
    NoSubject,
    #[error("camera open was superseded")]
    Superseded,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Camera,
    Upload,
}

/// A still ready for the punch pipeline, tagged with the punch type that was
/// selected when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedImage {
    pub data_url: String,
    pub punch_type: PunchType,
    pub source: ImageSource,
}

impl CapturedImage {
    /// Accept an uploaded image file instead of a camera still.
    pub fn from_upload(bytes: &[u8], punch_type: PunchType) -> Result<Self, CaptureError> {
        let data_url = file_to_data_url(bytes)?;
        tracing::info!(bytes = bytes.len(), punch = %punch_type, "image uploaded");
        Ok(Self {
            data_url,
            punch_type,
            source: ImageSource::Upload,
        })
    }
}

/// What the capture surface currently allows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReadiness {
    pub ready: bool,
    pub has_subject: bool,
    pub in_position: bool,
    pub override_unlocked: bool,
    pub message: PresenceMessage,
}

impl CaptureReadiness {
    pub fn can_capture(&self) -> bool {
        self.ready && (self.has_subject || self.override_unlocked)
    }
}

struct LiveSession {
    stream: StreamGuard,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: watch::Receiver<PresenceStatus>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[derive(Default)]
struct Surface {
    generation: u64,
    session: Option<LiveSession>,
}

pub struct CaptureController {
    backend: Arc<dyn CameraBackend>,
    detector: Option<Arc<dyn FaceDetector>>,
    presence: PresencePolicy,
    capture: CapturePolicy,
    surface: Mutex<Surface>,
}

impl CaptureController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        detector: Option<Arc<dyn FaceDetector>>,
        presence: PresencePolicy,
        capture: CapturePolicy,
    ) -> Self {
        Self {
            backend,
            detector,
            presence,
            capture,
            surface: Mutex::new(Surface::default()),
        }
    }

    fn surface(&self) -> MutexGuard<'_, Surface> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the front camera and start the presence loop.
    pub async fn open(&self) -> Result<(), CaptureError> {
        let (generation, previous) = {
            let mut surface = self.surface();
            surface.generation += 1;
            (surface.generation, surface.session.take())
        };
        if previous.is_some() {
            tracing::debug!("replacing live camera session");
        }
        drop(previous);

        tracing::info!(detector = self.detector.is_some(), "opening camera");
        let stream = match self.backend.open(Facing::User).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "camera open failed");
                return Err(err.into());
            }
        };
        let guard = StreamGuard::new(stream);

        let mut surface = self.surface();
        if surface.generation != generation {
            tracing::debug!("camera opened after the surface moved on; stopping it");
            return Err(CaptureError::Superseded);
        }

        let (tx, rx) = watch::channel(PresenceStatus::opening());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_presence_loop(
            guard.stream(),
            self.detector.clone(),
            self.presence.clone(),
            tx,
            cancel.clone(),
        ));
        surface.session = Some(LiveSession {
            stream: guard,
            cancel,
            task,
            status: rx,
        });
        Ok(())
    }

    /// Release the stream and stop the presence loop. Idempotent.
    pub fn close(&self) {
        let session = {
            let mut surface = self.surface();
            surface.generation += 1;
            surface.session.take()
        };
        if session.is_some() {
            tracing::info!("camera closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.surface().session.is_some()
    }

    /// Latest presence status, or `None` when the surface is closed.
    pub fn status(&self) -> Option<PresenceStatus> {
        self.surface()
            .session
            .as_ref()
            .map(|s| s.status.borrow().clone())
    }

    pub fn readiness(&self) -> Option<CaptureReadiness> {
        let status = self.status()?;
        Some(self.readiness_of(&status))
    }

    pub fn can_capture(&self) -> bool {
        self.readiness().is_some_and(|r| r.can_capture())
    }

    fn readiness_of(&self, status: &PresenceStatus) -> CaptureReadiness {
        let override_unlocked = status
            .ready_since
            .is_some_and(|since| since.elapsed() >= self.presence.override_delay());
        CaptureReadiness {
            ready: status.is_ready(),
            has_subject: status.has_subject,
            in_position: status.in_position,
            override_unlocked,
            message: status.message,
        }
    }

    /// Take a still from the live stream and close the surface.
    ///
    /// Allowed once the stream is decodable and either a face is present or
    /// the override delay has elapsed since readiness.
    pub fn capture_still(&self, punch_type: PunchType) -> Result<CapturedImage, CaptureError> {
        let frame = {
            let surface = self.surface();
            let session = surface.session.as_ref().ok_or(CaptureError::NotOpen)?;
            let status = session.status.borrow().clone();
            let readiness = self.readiness_of(&status);
            if !readiness.ready || !session.stream.is_decodable() {
                return Err(CaptureError::NotReady);
            }
            if !readiness.can_capture() {
                return Err(CaptureError::NoSubject);
            }
            if !readiness.has_subject {
                tracing::info!("capturing without a detected face after override delay");
            }
            session.stream.current_frame().ok_or(CaptureError::NotReady)?
        };

        let data_url = encode_jpeg_data_url(&frame, self.capture.jpeg_quality)?;
        self.close();
        tracing::info!(
            width = frame.width,
            height = frame.height,
            punch = %punch_type,
            "still captured"
        );
        Ok(CapturedImage {
            data_url,
            punch_type,
            source: ImageSource::Camera,
        })
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.close();
    }
}
