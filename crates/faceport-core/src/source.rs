//! Image source seam: where frames come from.

use std::time::Instant;
use thiserror::Error;

/// A still image ready to submit for recognition.
#[derive(Clone)]
pub struct CapturedFrame {
    /// JPEG-encoded image bytes.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("jpeg_bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The camera could not produce a frame this tick.
///
/// Not an error of the loop: the tick is skipped and retried on the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("camera unavailable: {reason}")]
pub struct CameraUnavailable {
    pub reason: String,
}

impl CameraUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Anything that can hand the loop a frame on demand.
pub trait ImageSource: Send {
    fn capture(&mut self, now: Instant) -> Result<CapturedFrame, CameraUnavailable>;
}

impl<T: ImageSource + ?Sized> ImageSource for Box<T> {
    fn capture(&mut self, now: Instant) -> Result<CapturedFrame, CameraUnavailable> {
        (**self).capture(now)
    }
}
