//! Camera contracts: a backend that opens user-facing streams, and the
//! stream handle the capture surface reads frames from.

use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Which physical camera to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// Front camera, pointing at the person holding the device.
    #[default]
    User,
    Environment,
}

/// A live camera stream.
///
/// Frames become readable once the stream reports itself decodable.
/// `stop` ends every underlying track and must be safe to call more than once.
pub trait VideoStream: Send + Sync {
    /// True once the stream has enough data to hand out a current frame.
    fn is_decodable(&self) -> bool;

    /// Current frame, or `None` if nothing is decodable yet.
    fn current_frame(&self) -> Option<Frame>;

    /// Stop all tracks.
    fn stop(&self);

    /// Whether any track is still running.
    fn is_live(&self) -> bool;
}

/// Opens camera streams.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    async fn open(&self, facing: Facing) -> Result<Arc<dyn VideoStream>, CameraError>;
}

/// Owns a stream and stops it when dropped.
///
/// Every path that lets go of the stream (surface closed, owner torn down,
/// stream replaced, error) goes through this guard, so no track outlives it.
pub struct StreamGuard {
    stream: Arc<dyn VideoStream>,
}

impl StreamGuard {
    pub fn new(stream: Arc<dyn VideoStream>) -> Self {
        Self { stream }
    }

    /// Shared handle for readers such as the presence loop.
    pub fn stream(&self) -> Arc<dyn VideoStream> {
        Arc::clone(&self.stream)
    }

    pub fn is_decodable(&self) -> bool {
        self.stream.is_decodable()
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.stream.current_frame()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stream.stop();
        tracing::debug!("camera stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingStream {
        live: AtomicBool,
        stops: AtomicUsize,
    }

    impl VideoStream for CountingStream {
        fn is_decodable(&self) -> bool {
            true
        }
        fn current_frame(&self) -> Option<Frame> {
            None
        }
        fn stop(&self) {
            self.live.store(false, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_guard_stops_stream_on_drop() {
        let stream = Arc::new(CountingStream {
            live: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
        });
        let guard = StreamGuard::new(stream.clone());
        let reader = guard.stream();
        assert!(reader.is_live());

        drop(guard);
        assert!(!stream.is_live());
        assert_eq!(stream.stops.load(Ordering::SeqCst), 1);
    }
}
