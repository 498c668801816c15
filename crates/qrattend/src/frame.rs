//! Frame sources: a live camera driven by an external grab command, or a
//! single still image.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageReader, RgbaImage};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::ScanSource;

/// Placeholder in the camera command replaced with the device path.
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Which camera to use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear camera.
    #[default]
    Environment,
    /// Front camera.
    User,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Something that produces frames for the scan loop.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// The source type recorded on log entries.
    fn source(&self) -> ScanSource;

    /// Acquire the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraUnavailable`] if the device cannot be used.
    async fn start(&mut self) -> Result<()>;

    /// Next frame, or `None` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if this frame could not be grabbed. The loop treats
    /// that as transient.
    async fn next_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// Release the device.
    fn stop(&mut self);
}

/// A still image, yielded exactly once.
#[derive(Debug, Clone)]
pub struct StillImage {
    image: Option<RgbaImage>,
}

impl StillImage {
    /// Load and decode an image file. The format is guessed from content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImage`] if the file cannot be read or decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let invalid = |source| Error::InvalidImage {
            path: path.to_path_buf(),
            source,
        };

        let image = ImageReader::open(path)
            .map_err(|e| invalid(image::ImageError::IoError(e)))?
            .with_guessed_format()
            .map_err(|e| invalid(image::ImageError::IoError(e)))?
            .decode()
            .map_err(invalid)?;

        debug!(path = %path.display(), width = image.width(), height = image.height(), "Loaded image");
        Ok(Self::from_image(image.into_rgba8()))
    }

    /// Wrap an already decoded raster.
    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image: Some(image) }
    }
}

#[async_trait::async_trait]
impl FrameSource for StillImage {
    fn source(&self) -> ScanSource {
        ScanSource::Image
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        Ok(self.image.take())
    }

    fn stop(&mut self) {
        self.image = None;
    }
}

/// Camera driven by running a grab command once per frame.
///
/// The command must write one encoded image (PNG, JPEG) to stdout.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    argv: Vec<String>,
    timeout: Duration,
    started: bool,
}

impl CommandCamera {
    /// Create a camera from an argv template and a device path.
    #[must_use]
    pub fn new(template: &[String], device: &str, timeout: Duration) -> Self {
        let argv = template
            .iter()
            .map(|arg| arg.replace(DEVICE_PLACEHOLDER, device))
            .collect();
        Self {
            argv,
            timeout,
            started: false,
        }
    }

    /// Camera for `facing` as configured.
    #[must_use]
    pub fn from_config(config: &Config, facing: Facing) -> Self {
        Self::new(
            &config.camera.command,
            config.camera_device(facing),
            config.camera_timeout(),
        )
    }

    /// The resolved command line.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    async fn grab(&self) -> Result<RgbaImage> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| Error::camera_unavailable("empty camera command"))?;

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("frame grab ({program})"),
            })?
            .map_err(|e| Error::camera_unavailable(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            return Err(Error::camera_unavailable(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| Error::camera_unavailable(format!("unreadable frame: {e}")))?;
        Ok(image.into_rgba8())
    }
}

#[async_trait::async_trait]
impl FrameSource for CommandCamera {
    fn source(&self) -> ScanSource {
        ScanSource::Camera
    }

    async fn start(&mut self) -> Result<()> {
        let probe = self.grab().await.map_err(|e| match e {
            Error::CameraUnavailable { .. } => e,
            other => Error::camera_unavailable(other.to_string()),
        })?;
        info!(
            command = %self.argv.join(" "),
            width = probe.width(),
            height = probe.height(),
            "Camera started"
        );
        self.started = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        if !self.started {
            return Ok(None);
        }
        self.grab().await.map(Some)
    }

    fn stop(&mut self) {
        if self.started {
            debug!("Camera stopped");
        }
        self.started = false;
    }
}

/// Encode a raster as a `data:image/jpeg;base64,...` URI.
///
/// # Errors
///
/// Returns [`Error::ImageEncode`] if JPEG encoding fails.
pub fn encode_snapshot(frame: &RgbaImage, quality: u8) -> Result<String> {
    // JPEG has no alpha channel
    let rgb = image::DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    ))
}

/// Write the raster to `path`; the format follows the extension.
///
/// # Errors
///
/// Returns [`Error::ImageEncode`] if the image cannot be written.
pub fn save_frame(frame: &RgbaImage, path: &Path) -> Result<()> {
    frame.save(path)?;
    Ok(())
}
