//! The camera as an [`ImageSource`] for the control loop.

use crate::camera::{Camera, CameraError};
use faceport_core::{CameraUnavailable, CapturedFrame, ImageSource};
use std::time::Instant;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Lazily opened camera that reports trouble as `Unavailable`.
///
/// A failed open or capture drops the device handle, so the next tick
/// starts from a fresh open (unplug/replug, permission granted later).
pub struct CameraSource {
    device_path: String,
    permitted: bool,
    jpeg_quality: u8,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            permitted: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            camera: None,
        }
    }

    /// Whether the host has granted camera access. Read, never managed, here.
    pub fn with_permission(mut self, permitted: bool) -> Self {
        self.permitted = permitted;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    fn camera(&mut self) -> Result<&Camera, CameraError> {
        if self.camera.is_none() {
            let camera = Camera::open(&self.device_path)?;
            self.camera = Some(camera);
        }
        self.camera
            .as_ref()
            .ok_or_else(|| CameraError::DeviceNotFound(self.device_path.clone()))
    }
}

impl ImageSource for CameraSource {
    fn capture(&mut self, now: Instant) -> Result<CapturedFrame, CameraUnavailable> {
        if !self.permitted {
            return Err(CameraUnavailable::new("camera permission not granted"));
        }

        let captured = self
            .camera()
            .and_then(|camera| camera.capture_frames(1));
        let (frames, dark) = match captured {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(device = %self.device_path, error = %err, "camera capture failed");
                self.camera = None;
                return Err(CameraUnavailable::new(err.to_string()));
            }
        };

        let Some(frame) = frames.into_iter().next() else {
            tracing::debug!(dark, "only dark frames; skipping");
            return Err(CameraUnavailable::new("frame too dark"));
        };

        let jpeg = frame.to_jpeg(self.jpeg_quality).map_err(|e| {
            tracing::warn!(error = %e, "JPEG encoding failed");
            CameraUnavailable::new(e.to_string())
        })?;

        Ok(CapturedFrame {
            jpeg,
            width: frame.width,
            height: frame.height,
            captured_at: now,
        })
    }
}
