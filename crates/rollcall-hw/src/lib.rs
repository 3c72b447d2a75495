//! rollcall-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access with scoped capture sessions and
//! conversion of YUYV / MJPG buffers into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureDevice, CaptureSession, FrameSource, PixelFormat};
pub use frame::Frame;
