//! faceport-hw: Hardware abstraction for the kiosk camera.
//!
//! Provides V4L2-based capture, pixel conversion, dark-frame rejection and
//! JPEG encoding, packaged as an [`faceport_core::ImageSource`].

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError, PixelLayout};
pub use source::CameraSource;
