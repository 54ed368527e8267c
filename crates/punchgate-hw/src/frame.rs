//! Frame type and still encoding: raw RGB frames to JPEG data URLs,
//! uploaded image files to data URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame, checking the buffer matches the stated dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Solid-color frame, handy for probes and diagnostics.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 3)
            .collect();
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }
}

/// Encode a frame as a `data:image/jpeg;base64,...` URL.
///
/// `quality` is the JPEG quality in 1–100.
pub fn encode_jpeg_data_url(frame: &Frame, quality: u8) -> Result<String, FrameError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FrameError::Empty);
    }
    let img = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        FrameError::InvalidLength {
            expected: (frame.width as usize) * (frame.height as usize) * 3,
            actual: frame.data.len(),
        },
    )?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&img)
        .map_err(|e| FrameError::Encode(e.to_string()))?;

    tracing::debug!(
        width = frame.width,
        height = frame.height,
        bytes = jpeg.len(),
        "encoded still"
    );
    Ok(to_data_url("image/jpeg", &jpeg))
}

/// Turn an uploaded image file into a data URL, sniffing the mime type from content.
pub fn file_to_data_url(bytes: &[u8]) -> Result<String, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let format = image::guess_format(bytes).map_err(|_| FrameError::UnsupportedFile)?;
    Ok(to_data_url(format.to_mime_type(), bytes))
}

fn to_data_url(mime: &str, payload: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(payload))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame or file is empty")]
    Empty,
    #[error("file is not a recognised image")]
    UnsupportedFile,
    #[error("encode failed: {0}")]
    Encode(String),
}
