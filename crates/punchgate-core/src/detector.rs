//! Face detector contract and candidate selection.
//!
//! The detector itself is supplied by the host (an ONNX session, a browser
//! model, a remote service). The pipeline only relies on candidates carrying a
//! score and a box in one of the shapes [`RawBox`] accepts.

use crate::types::{DetectionBox, RawBox};
use async_trait::async_trait;
use punchgate_hw::Frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    #[error("detector failed to load: {0}")]
    LoadFailed(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// One face candidate as returned by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub score: f32,
    #[serde(rename = "box", default)]
    pub bbox: RawBox,
}

#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Candidate>, DetectorError>;
}

/// Accept a loaded detector, or log the load failure and fall back to
/// override-only capture.
pub fn detector_or_manual(
    loaded: Result<Arc<dyn FaceDetector>, DetectorError>,
) -> Option<Arc<dyn FaceDetector>> {
    match loaded {
        Ok(detector) => {
            tracing::info!("face detector loaded");
            Some(detector)
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                "face detector unavailable; capture falls back to manual override"
            );
            None
        }
    }
}

/// Pick the candidate with the largest normalized area.
///
/// Ties keep the earlier candidate. Returns the winner's normalized box.
pub fn largest_candidate(candidates: &[Candidate]) -> Option<(usize, DetectionBox)> {
    let mut best: Option<(usize, DetectionBox)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let bbox = candidate.bbox.normalize();
        let is_better = match &best {
            None => true,
            Some((_, prev)) => bbox.area() > prev.area(),
        };
        if is_better {
            best = Some((i, bbox));
        }
    }
    best
}
