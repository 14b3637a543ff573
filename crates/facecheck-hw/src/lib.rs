//! facecheck-hw: Frame source for the capture orchestrator.
//!
//! Provides the `FrameSource` seam, a V4L2-backed `Camera`, and
//! grayscale/JPEG helpers for turning frames into uploadable stills.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError, FrameSource};
