use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceport_hw::{Camera, CameraError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faceport", about = "Faceport kiosk control CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show what the kiosk screen currently displays
    View,
    /// Start capturing
    Enable,
    /// Stop capturing; an in-flight result is discarded
    Disable,
    /// Capture one frame directly from the camera (bypasses the daemon)
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// JPEG quality used for the encoded frame
        #[arg(short, long, default_value_t = 85)]
        quality: u8,
        /// Write the encoded JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

// D-Bus proxy for the kiosk daemon.
#[zbus::proxy(
    interface = "org.faceport.Kiosk1",
    default_service = "org.faceport.Kiosk1",
    default_path = "/org/faceport/Kiosk1"
)]
trait Kiosk {
    async fn status(&self) -> zbus::Result<String>;
    async fn view(&self) -> zbus::Result<String>;
    async fn set_active(&self, active: bool) -> zbus::Result<bool>;
}

async fn connect(session: bool) -> Result<KioskProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    KioskProxy::new(&conn)
        .await
        .context("faceportd is not reachable on the bus")
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("{raw}"),
    }
}

fn toggle_message(previous: bool, now: bool) -> String {
    let state = |on: bool| if on { "enabled" } else { "disabled" };
    if previous == now {
        format!("capturing already {}", state(now))
    } else {
        format!("capturing {} (was {})", state(now), state(previous))
    }
}

fn run_camera_test(device: &str, quality: u8, output: Option<PathBuf>) -> Result<()> {
    println!("Opening {device}...");
    let camera = match Camera::open(device) {
        Ok(camera) => camera,
        Err(CameraError::PermissionDenied(path)) => {
            anyhow::bail!("permission denied on {path}; is the user in the `video` group?")
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "  {}x{} {:?} ({:?})",
        camera.width,
        camera.height,
        camera.pixel_format(),
        camera.fourcc
    );

    let frame = camera.capture_frame()?;
    println!(
        "  frame #{}: brightness {:.1}, dark: {}",
        frame.sequence,
        frame.avg_brightness(),
        frame.is_dark()
    );

    let jpeg = frame.to_jpeg(quality)?;
    println!("  JPEG (quality {quality}): {} bytes", jpeg.len());

    if let Some(path) = output {
        std::fs::write(&path, &jpeg)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("  written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            print_json(&proxy.status().await?);
        }
        Commands::View => {
            let proxy = connect(cli.session).await?;
            print_json(&proxy.view().await?);
        }
        Commands::Enable => {
            let proxy = connect(cli.session).await?;
            let previous = proxy.set_active(true).await?;
            println!("{}", toggle_message(previous, true));
        }
        Commands::Disable => {
            let proxy = connect(cli.session).await?;
            let previous = proxy.set_active(false).await?;
            println!("{}", toggle_message(previous, false));
        }
        Commands::Test {
            device,
            quality,
            output,
        } => {
            tracing::debug!(device = %device, "camera diagnostics");
            tokio::task::spawn_blocking(move || run_camera_test(&device, quality, output))
                .await??;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
