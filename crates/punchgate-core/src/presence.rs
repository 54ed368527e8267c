//! Face-presence loop.
//!
//! While the capture surface is live, frames are fed to the detector at most
//! once per detection interval. Each tick publishes whether a subject is
//! present, whether it sits inside the guide circle at a usable size, and a
//! message telling the user what to change.

use crate::config::PresencePolicy;
use crate::detector::{largest_candidate, Candidate, FaceDetector};
use crate::error::FailureKind;
use punchgate_hw::VideoStream;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceMessage {
    OpeningCamera,
    Ready,
    DetectorUnavailable,
    NoSubject,
    PositionIndeterminate,
    MoveCloser,
    CenterYourself,
    InPosition,
    TransientError,
}

impl fmt::Display for PresenceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PresenceMessage::OpeningCamera => "Opening camera...",
            PresenceMessage::Ready => "Ready to detect your face",
            PresenceMessage::DetectorUnavailable => "Face detection unavailable",
            PresenceMessage::NoSubject => "No face detected",
            PresenceMessage::PositionIndeterminate => {
                "Face detected (move to the center of the circle)"
            }
            PresenceMessage::MoveCloser => "Move a little closer to the camera",
            PresenceMessage::CenterYourself => "Move your face to the center of the circle",
            PresenceMessage::InPosition => "Face is inside the circle",
            PresenceMessage::TransientError => "Detection hiccup, add light or move slightly",
        };
        f.write_str(text)
    }
}

impl PresenceMessage {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PresenceMessage::TransientError => Some(FailureKind::TransientInferenceError),
            _ => None,
        }
    }
}

/// Result of judging one frame's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameVerdict {
    pub has_subject: bool,
    pub in_position: bool,
    pub message: PresenceMessage,
}

/// Latest state published by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceStatus {
    /// When the stream first became decodable.
    pub ready_since: Option<Instant>,
    pub has_subject: bool,
    pub in_position: bool,
    pub message: PresenceMessage,
}

impl PresenceStatus {
    pub fn opening() -> Self {
        Self {
            ready_since: None,
            has_subject: false,
            in_position: false,
            message: PresenceMessage::OpeningCamera,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_since.is_some()
    }

    fn apply(&mut self, verdict: FrameVerdict) {
        self.has_subject = verdict.has_subject;
        self.in_position = verdict.in_position;
        self.message = verdict.message;
    }
}

/// Judge detector output for a frame of the given size.
pub fn judge_candidates(
    candidates: &[Candidate],
    frame_width: u32,
    frame_height: u32,
    policy: &PresencePolicy,
) -> FrameVerdict {
    let Some((_, bbox)) = largest_candidate(candidates) else {
        return FrameVerdict {
            has_subject: false,
            in_position: false,
            message: PresenceMessage::NoSubject,
        };
    };

    if !bbox.is_usable() {
        return FrameVerdict {
            has_subject: true,
            in_position: false,
            message: PresenceMessage::PositionIndeterminate,
        };
    }

    let frame_w = frame_width.max(1) as f64;
    let frame_h = frame_height.max(1) as f64;

    let center_x = (bbox.x_min + bbox.width / 2.0) / frame_w;
    let center_y = (bbox.y_min + bbox.height / 2.0) / frame_h;
    let radial = (center_x - 0.5).hypot(center_y - 0.5);

    let min_size = frame_w.min(frame_h) * policy.min_face_fraction;
    let size_ok = bbox.width.max(bbox.height) >= min_size;
    let centered = radial <= policy.acceptance_radius * policy.radius_slack;
    let in_position = centered && size_ok;

    let message = if in_position {
        PresenceMessage::InPosition
    } else if !size_ok {
        PresenceMessage::MoveCloser
    } else {
        PresenceMessage::CenterYourself
    };

    FrameVerdict {
        has_subject: true,
        in_position,
        message,
    }
}

/// Poll the stream until cancelled, publishing into `status`.
///
/// Inference errors only affect the tick they happen on. The loop ends when
/// `cancel` fires or every status receiver is gone.
pub async fn run_presence_loop(
    stream: Arc<dyn VideoStream>,
    detector: Option<Arc<dyn FaceDetector>>,
    policy: PresencePolicy,
    status: watch::Sender<PresenceStatus>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(policy.detection_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        if status.is_closed() {
            break;
        }

        if !stream.is_decodable() {
            continue;
        }

        if status.borrow().ready_since.is_none() {
            let message = if detector.is_some() {
                PresenceMessage::Ready
            } else {
                PresenceMessage::DetectorUnavailable
            };
            status.send_modify(|s| {
                s.ready_since = Some(Instant::now());
                s.message = message;
            });
            tracing::debug!(?message, "capture surface ready");
        }

        let Some(detector) = detector.as_ref() else {
            continue;
        };
        let Some(frame) = stream.current_frame() else {
            continue;
        };

        ticks += 1;
        let detected = tokio::select! {
            r = detector.detect(&frame) => r,
            _ = cancel.cancelled() => break,
        };

        let verdict = match detected {
            Ok(candidates) => judge_candidates(&candidates, frame.width, frame.height, &policy),
            Err(err) => {
                tracing::warn!(error = %err, tick = ticks, "face inference failed");
                FrameVerdict {
                    has_subject: false,
                    in_position: false,
                    message: PresenceMessage::TransientError,
                }
            }
        };
        status.send_modify(|s| s.apply(verdict));
    }

    tracing::debug!(ticks, "presence loop stopped");
}
