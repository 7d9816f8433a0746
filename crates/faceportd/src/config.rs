use faceport_core::{CapturePolicy, DelayedPresence, FixedInterval, PresenceDebounce};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Tick cadence for the presence policy, which needs finer sampling than
/// the fixed interval to honour its settle window.
const PRESENCE_TICK_MS: u64 = 250;
const INTERVAL_TICK_MS: u64 = 3000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which capture policy drives the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Interval,
    Presence,
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(PolicyKind::Interval),
            "presence" => Ok(PolicyKind::Presence),
            other => Err(ConfigError::Invalid(format!(
                "unknown policy {other:?} (expected \"interval\" or \"presence\")"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(BusKind::System),
            "session" => Ok(BusKind::Session),
            other => Err(ConfigError::Invalid(format!("unknown bus {other:?}"))),
        }
    }
}

/// Daemon configuration: defaults, then the TOML file, then `FACEPORT_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the recognition API.
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// Scheduler tick; `None` picks a default suited to the policy.
    pub tick_interval_ms: Option<u64>,
    pub display_window_ms: u64,
    pub policy: PolicyKind,
    /// Presence settle window.
    pub settle_ms: u64,
    /// Idle time before the simulated presence signal reports a face.
    pub presence_delay_ms: u64,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Whether the host has granted camera access.
    pub camera_permitted: bool,
    pub jpeg_quality: u8,
    /// Kiosk identity sent with each recognition; generated when unset.
    pub device_id: Option<String>,
    pub start_active: bool,
    pub bus: BusKind,
    /// Where the generated device id is persisted.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api/v1".to_string(),
            request_timeout_secs: 30,
            tick_interval_ms: None,
            display_window_ms: 5000,
            policy: PolicyKind::Interval,
            settle_ms: 1000,
            presence_delay_ms: 2000,
            camera_device: "/dev/video0".to_string(),
            camera_permitted: true,
            jpeg_quality: 85,
            device_id: None,
            start_active: true,
            bus: BusKind::System,
            data_dir: default_data_dir(),
        }
    }
}

/// On-disk form: every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    api_url: Option<String>,
    request_timeout_secs: Option<u64>,
    tick_interval_ms: Option<u64>,
    display_window_ms: Option<u64>,
    policy: Option<PolicyKind>,
    settle_ms: Option<u64>,
    presence_delay_ms: Option<u64>,
    camera_device: Option<String>,
    camera_permitted: Option<bool>,
    jpeg_quality: Option<u8>,
    device_id: Option<String>,
    start_active: Option<bool>,
    bus: Option<BusKind>,
    data_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `FACEPORT_CONFIG` (or the XDG default, if present) and the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = config_file_path() {
            config.apply_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        self.merge(file);
        Ok(())
    }

    pub(crate) fn merge(&mut self, file: FileConfig) {
        if let Some(v) = file.api_url {
            self.api_url = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.display_window_ms {
            self.display_window_ms = v;
        }
        if let Some(v) = file.policy {
            self.policy = v;
        }
        if let Some(v) = file.settle_ms {
            self.settle_ms = v;
        }
        if let Some(v) = file.presence_delay_ms {
            self.presence_delay_ms = v;
        }
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.camera_permitted {
            self.camera_permitted = v;
        }
        if let Some(v) = file.jpeg_quality {
            self.jpeg_quality = v;
        }
        if let Some(v) = file.start_active {
            self.start_active = v;
        }
        if let Some(v) = file.bus {
            self.bus = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if file.tick_interval_ms.is_some() {
            self.tick_interval_ms = file.tick_interval_ms;
        }
        if file.device_id.is_some() {
            self.device_id = file.device_id;
        }
    }

    pub(crate) fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEPORT_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_TICK_INTERVAL_MS") {
            self.tick_interval_ms = Some(v);
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_DISPLAY_WINDOW_MS") {
            self.display_window_ms = v;
        }
        if let Some(v) = lookup("FACEPORT_POLICY") {
            self.policy = v.parse()?;
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_SETTLE_MS") {
            self.settle_ms = v;
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_PRESENCE_DELAY_MS") {
            self.presence_delay_ms = v;
        }
        if let Some(v) = lookup("FACEPORT_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEPORT_CAMERA_PERMITTED") {
            self.camera_permitted = v != "0";
        }
        if let Some(v) = parsed(&lookup, "FACEPORT_JPEG_QUALITY") {
            self.jpeg_quality = v;
        }
        if let Some(v) = lookup("FACEPORT_DEVICE_ID").filter(|v| !v.trim().is_empty()) {
            self.device_id = Some(v);
        }
        if let Some(v) = lookup("FACEPORT_START_ACTIVE") {
            self.start_active = v != "0";
        }
        if let Some(v) = lookup("FACEPORT_BUS") {
            self.bus = v.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeout must be > 0".into()));
        }
        if self.tick_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("tick interval must be > 0".into()));
        }
        if self.display_window_ms == 0 {
            return Err(ConfigError::Invalid("display window must be > 0".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg quality {} out of range 1..=100",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        let ms = self.tick_interval_ms.unwrap_or(match self.policy {
            PolicyKind::Interval => INTERVAL_TICK_MS,
            PolicyKind::Presence => PRESENCE_TICK_MS,
        });
        Duration::from_millis(ms)
    }

    pub fn display_window(&self) -> Duration {
        Duration::from_millis(self.display_window_ms)
    }

    /// Build the configured capture policy.
    pub fn build_policy(&self) -> Box<dyn CapturePolicy> {
        match self.policy {
            PolicyKind::Interval => Box::new(FixedInterval::new(self.tick_interval())),
            PolicyKind::Presence => Box::new(PresenceDebounce::new(
                DelayedPresence::new(Duration::from_millis(self.presence_delay_ms)),
                Duration::from_millis(self.settle_ms),
            )),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACEPORT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let config_home = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    let path = config_home.join("faceport/faceportd.toml");
    path.exists().then_some(path)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("faceport")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
