//! Configuration management for qrattend.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::decoder::FallbackPolicy;
use crate::engine::{format_timestamp, DedupScope};
use crate::error::{Error, Result};
use crate::frame::Facing;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "qrattend";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "attendance.db";

/// Key the attendance log is stored under.
pub const DEFAULT_LOG_KEY: &str = "qr-scanner-log-v3";

/// Default number of records kept in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `QRATTEND_`, sections separated by `__`)
/// 2. TOML config file at `~/.config/qrattend/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Attendance log configuration.
    pub log: LogConfig,
    /// Scan loop configuration.
    pub scan: ScanConfig,
    /// Camera configuration.
    pub camera: CameraConfig,
    /// Decoder configuration.
    pub decoder: DecoderConfig,
    /// Side effects run after an accepted detection.
    pub actions: ActionsConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/qrattend/attendance.db`
    pub database_path: Option<PathBuf>,
    /// Key holding the JSON-encoded log.
    pub log_key: String,
}

/// Attendance log configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Maximum number of records kept; older ones are dropped.
    pub capacity: usize,
    /// chrono format for the record date.
    pub date_format: String,
    /// chrono format for log-in and log-out times.
    pub time_format: String,
    /// Attach a JPEG snapshot of the frame to new records.
    pub capture_snapshots: bool,
    /// JPEG quality for snapshots (1-100).
    pub snapshot_quality: u8,
}

/// Scan loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Repeat detections of the same text inside this window are ignored.
    pub dedup_window_ms: u64,
    /// Whether the dedup gate also compares the source type.
    pub dedup_scope: DedupScope,
    /// Delay between camera ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Preferred camera.
    pub facing: Facing,
}

/// Camera configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame grab command. `{device}` is replaced with the device for the
    /// selected facing mode. The command must write one encoded image to stdout.
    pub command: Vec<String>,
    /// Device per facing mode.
    pub devices: CameraDevices,
    /// Upper bound for a single frame grab in milliseconds.
    pub timeout_ms: u64,
}

/// Camera device paths per facing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDevices {
    /// Rear ("environment") camera.
    pub environment: String,
    /// Front ("user") camera.
    pub user: String,
}

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Probe for and prefer the platform scanner.
    pub native_enabled: bool,
    /// Program used as the platform scanner.
    pub native_program: String,
    /// What to do after the platform scanner fails.
    pub fallback_policy: FallbackPolicy,
    /// Upper bound for a single platform scanner run in milliseconds.
    pub timeout_ms: u64,
}

/// Toggles for side effects of an accepted detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Ring the terminal bell.
    pub sound: bool,
    /// Copy the payload to the clipboard.
    pub auto_copy: bool,
    /// Open `http(s)://` payloads in the browser.
    pub auto_open_url: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            log_key: DEFAULT_LOG_KEY.to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S".to_string(),
            capture_snapshots: true,
            snapshot_quality: 85,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 2500,
            dedup_scope: DedupScope::Global,
            tick_interval_ms: 100,
            facing: Facing::Environment,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: default_camera_command(),
            devices: CameraDevices::default(),
            timeout_ms: 5000,
        }
    }
}

impl Default for CameraDevices {
    fn default() -> Self {
        Self {
            environment: "/dev/video0".to_string(),
            user: "/dev/video1".to_string(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            native_enabled: true,
            native_program: "zbarimg".to_string(),
            fallback_policy: FallbackPolicy::RetryNative,
            timeout_ms: 5000,
        }
    }
}

/// Single-frame v4l2 grab written to stdout as PNG.
fn default_camera_command() -> Vec<String> {
    [
        "ffmpeg",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "v4l2",
        "-i",
        "{device}",
        "-frames:v",
        "1",
        "-f",
        "image2pipe",
        "-vcodec",
        "png",
        "-",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("QRATTEND_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.log.capacity == 0 {
            return Err(invalid("log.capacity must be greater than 0"));
        }

        if !(1..=100).contains(&self.log.snapshot_quality) {
            return Err(invalid(format!(
                "log.snapshot_quality must be between 1 and 100, got {}",
                self.log.snapshot_quality
            )));
        }

        if self.log.date_format.trim().is_empty() || self.log.time_format.trim().is_empty() {
            return Err(invalid("log.date_format and log.time_format must not be empty"));
        }

        // Unknown specifiers and offset specifiers (%z, %Z) both fail to render
        let sample = NaiveDate::from_ymd_opt(2024, 1, 31)
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .unwrap_or_default();
        for format in [&self.log.date_format, &self.log.time_format] {
            if format_timestamp(sample, format).is_err() {
                return Err(invalid(format!("invalid date/time format: {format}")));
            }
        }

        if self.scan.tick_interval_ms == 0 {
            return Err(invalid("scan.tick_interval_ms must be greater than 0"));
        }

        if self.camera.command.is_empty() {
            return Err(invalid("camera.command must not be empty"));
        }

        if self.storage.log_key.is_empty() {
            return Err(invalid("storage.log_key must not be empty"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the dedup window as a Duration.
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.scan.dedup_window_ms)
    }

    /// Get the camera tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scan.tick_interval_ms)
    }

    /// Get the frame grab timeout as a Duration.
    #[must_use]
    pub fn camera_timeout(&self) -> Duration {
        Duration::from_millis(self.camera.timeout_ms)
    }

    /// Get the platform scanner timeout as a Duration.
    #[must_use]
    pub fn decoder_timeout(&self) -> Duration {
        Duration::from_millis(self.decoder.timeout_ms)
    }

    /// Get the device path configured for a facing mode.
    #[must_use]
    pub fn camera_device(&self, facing: Facing) -> &str {
        match facing {
            Facing::Environment => &self.camera.devices.environment,
            Facing::User => &self.camera.devices.user,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
