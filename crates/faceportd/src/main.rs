use anyhow::{Context, Result};
use faceport_core::{FeedbackEvent, Scheduler};
use faceport_hw::CameraSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod client;
mod config;
mod dbus_interface;
mod engine;
mod identity;

use client::{ClientConfig, HttpRecognitionClient};
use config::{BusKind, Config};
use dbus_interface::{KioskInfo, KioskService, BUS_NAME, OBJECT_PATH};
use engine::EngineSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "faceportd starting");

    let config = Config::load().context("failed to load configuration")?;
    let device_id = identity::resolve_device_id(config.device_id.as_deref(), &config.data_dir)
        .context("failed to resolve kiosk device id")?;
    tracing::info!(
        device_id = %device_id,
        api_url = %config.api_url,
        camera = %config.camera_device,
        "configuration loaded"
    );

    let client = HttpRecognitionClient::new(ClientConfig {
        base_url: config.api_url.clone(),
        timeout: config.request_timeout(),
        device_id: Some(device_id.clone()),
    })?;
    tracing::info!(endpoint = client.endpoint(), "recognition client ready");

    let source = CameraSource::new(config.camera_device.clone())
        .with_permission(config.camera_permitted)
        .with_jpeg_quality(config.jpeg_quality);
    if !config.camera_permitted {
        tracing::warn!("camera permission not granted; captures will be skipped");
    }

    let scheduler = Scheduler::from_boxed(config.build_policy());
    let policy = scheduler.policy_name();

    let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel::<FeedbackEvent>();
    let sink = move |event: FeedbackEvent| {
        let _ = feedback_tx.send(event);
    };

    let settings = EngineSettings {
        tick_interval: config.tick_interval(),
        display_window: config.display_window(),
        start_active: config.start_active,
    };
    let (engine, mut engine_task) =
        engine::spawn_engine(settings, scheduler, source, Arc::new(client), sink);

    let service = KioskService::new(
        engine,
        KioskInfo {
            device_id,
            api_url: config.api_url.clone(),
            policy,
            camera_device: config.camera_device.clone(),
        },
    );
    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {:?} bus", config.bus))?;

    let forwarder = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
                Ok(emitter) => emitter,
                Err(e) => {
                    tracing::error!(error = %e, "cannot emit feedback signals");
                    return;
                }
            };
            while let Some(event) = feedback_rx.recv().await {
                tracing::debug!(attempt = %event.attempt, pattern = event.pattern.name(), "feedback");
                if let Err(e) = KioskService::feedback(
                    &emitter,
                    event.pattern.name(),
                    event.pattern.vibration_ms(),
                )
                .await
                {
                    tracing::warn!(error = %e, "failed to emit feedback signal");
                }
            }
        })
    };

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, policy, "faceportd ready");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("faceportd shutting down");
            Ok(())
        }
        joined = &mut engine_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "engine stopped");
                Err(e.into())
            }
            Err(e) => Err(anyhow::anyhow!("engine task panicked: {e}")),
        },
    };

    forwarder.abort();
    outcome
}
