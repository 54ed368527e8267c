//! punchgate-hw — Device contracts for the punch pipeline.
//!
//! Camera streams with stop-on-drop ownership, still encoding to data URLs,
//! and position watches with a guaranteed release hook.

pub mod camera;
pub mod frame;
pub mod position;

pub use camera::{CameraBackend, CameraError, Facing, StreamGuard, VideoStream};
pub use frame::{Frame, FrameError};
pub use position::{
    GeoProvider, PermissionState, PositionFix, PositionWatch, WatchError, WatchEvent, WatchOptions,
};
