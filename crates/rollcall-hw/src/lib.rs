//! rollcall-hw — V4L2 camera capture for the attendance session.
//!
//! Negotiates YUYV/GREY/Y16 and hands out 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
