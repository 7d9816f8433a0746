use crate::engine::{EngineError, EngineHandle};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.faceport.Kiosk1";
pub const OBJECT_PATH: &str = "/org/faceport/Kiosk1";

/// Static facts about this kiosk, reported by `Status()`.
#[derive(Debug, Clone)]
pub struct KioskInfo {
    pub device_id: String,
    pub api_url: String,
    pub policy: &'static str,
    pub camera_device: String,
}

/// D-Bus interface for the Faceport kiosk daemon.
///
/// Bus name: org.faceport.Kiosk1
/// Object path: /org/faceport/Kiosk1
pub struct KioskService {
    engine: EngineHandle,
    info: KioskInfo,
}

impl KioskService {
    pub fn new(engine: EngineHandle, info: KioskInfo) -> Self {
        Self { engine, info }
    }
}

fn engine_error(e: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %e, "engine request failed");
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.faceport.Kiosk1")]
impl KioskService {
    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let view = self.engine.view().await.map_err(engine_error)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "device_id": self.info.device_id,
            "api_url": self.info.api_url,
            "policy": self.info.policy,
            "camera": self.info.camera_device,
            "view": view,
        })
        .to_string())
    }

    /// Return what the kiosk screen should show, as JSON.
    async fn view(&self) -> zbus::fdo::Result<String> {
        let view = self.engine.view().await.map_err(engine_error)?;
        serde_json::to_string(&view).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Enable or disable capturing. Returns the previous value.
    async fn set_active(&self, active: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(active, "set_active requested");
        self.engine.set_active(active).await.map_err(engine_error)
    }

    /// Haptic/audio cue for a published result. Emitted once per attempt.
    #[zbus(signal)]
    pub async fn feedback(
        emitter: &SignalEmitter<'_>,
        pattern: &str,
        vibration_ms: &[u32],
    ) -> zbus::Result<()>;
}
