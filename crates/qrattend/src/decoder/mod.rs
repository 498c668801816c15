//! QR decoding capability.
//!
//! Two interchangeable [`Decoder`]s exist: the platform scanner program
//! ([`native::NativeDetector`]) and the built-in software decoder
//! ([`fallback::FallbackDecoder`]). [`DecoderSelector`] prefers the native one
//! and acquires the fallback when the native one is missing or fails.

pub mod fallback;
pub mod native;

use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub use fallback::FallbackDecoder;
pub use native::NativeDetector;

/// Errors from a single decode attempt. Transient: they cost one tick.
#[derive(Debug, Error)]
pub enum DecoderError {
    /// The decoder cannot handle this input or format.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The decoder ran but failed.
    #[error("decode failed: {0}")]
    Failed(String),

    /// The decoder did not answer in time.
    #[error("decoder timed out after {0:?}")]
    Timeout(Duration),

    /// Passing the frame to the decoder failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame could not be encoded for the decoder.
    #[error("frame encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A corner of a detected symbol, in raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: i32,
    /// Vertical position.
    pub y: i32,
}

/// Axis-aligned rectangle in raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Smallest rectangle containing all `points`.
    #[must_use]
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let min_x = points.iter().map(|p| p.x).min()?;
        let max_x = points.iter().map(|p| p.x).max()?;
        let min_y = points.iter().map(|p| p.y).min()?;
        let max_y = points.iter().map(|p| p.y).max()?;
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x.abs_diff(min_x),
            height: max_y.abs_diff(min_y),
        })
    }
}

/// Where a payload was found in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Axis-aligned box (native scanner).
    BoundingBox(Rect),
    /// Corners clockwise from top-left (software decoder).
    Polygon([Point; 4]),
}

impl Geometry {
    /// Enclosing rectangle.
    #[must_use]
    pub fn bounding_box(&self) -> Rect {
        match self {
            Self::BoundingBox(rect) => *rect,
            Self::Polygon(corners) => Rect::enclosing(corners).unwrap_or(Rect {
                x: 0,
                y: 0,
                width: 0,
                height: 0,
            }),
        }
    }
}

/// One decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    /// Decoded text.
    pub text: String,
    /// Location in the frame.
    pub geometry: Geometry,
}

/// Which decoder variant produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// The platform scanner program.
    Native,
    /// The built-in software decoder.
    Fallback,
}

impl std::fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A QR decoding capability.
#[async_trait::async_trait]
pub trait Decoder: Send {
    /// Which variant this is.
    fn kind(&self) -> DecoderKind;

    /// Find QR payloads in a frame. An empty vector means nothing was found.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder could not process the frame.
    async fn detect(
        &mut self,
        frame: &RgbaImage,
    ) -> std::result::Result<Vec<DecodedPayload>, DecoderError>;
}

/// What happens after the native decoder fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Keep trying native first on every frame.
    #[default]
    RetryNative,
    /// Use only the fallback for the rest of the session.
    Sticky,
}

type FallbackFactory = Box<dyn Fn() -> Box<dyn Decoder> + Send>;

/// Chooses between the native and fallback decoders for each frame.
///
/// A native failure acquires the fallback and decodes the same frame with it.
pub struct DecoderSelector {
    native: Option<Box<dyn Decoder>>,
    fallback: Option<Box<dyn Decoder>>,
    make_fallback: FallbackFactory,
    policy: FallbackPolicy,
    native_failed: bool,
}

impl std::fmt::Debug for DecoderSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSelector")
            .field("native", &self.native.is_some())
            .field("fallback_loaded", &self.fallback.is_some())
            .field("policy", &self.policy)
            .field("native_failed", &self.native_failed)
            .finish_non_exhaustive()
    }
}

impl DecoderSelector {
    /// Create a selector with the built-in software decoder as fallback.
    #[must_use]
    pub fn new(native: Option<Box<dyn Decoder>>, policy: FallbackPolicy) -> Self {
        Self::with_fallback_factory(
            native,
            policy,
            Box::new(|| Box::new(FallbackDecoder::new()) as Box<dyn Decoder>),
        )
    }

    /// Create a selector with a custom fallback constructor.
    #[must_use]
    pub fn with_fallback_factory(
        native: Option<Box<dyn Decoder>>,
        policy: FallbackPolicy,
        make_fallback: FallbackFactory,
    ) -> Self {
        let mut selector = Self {
            native,
            fallback: None,
            make_fallback,
            policy,
            native_failed: false,
        };
        if selector.native.is_none() {
            selector.acquire_fallback();
        }
        selector
    }

    /// Probe for the native scanner (if enabled) and build a selector.
    pub async fn from_config(config: &Config) -> Self {
        let native = if config.decoder.native_enabled {
            NativeDetector::probe(&config.decoder.native_program, config.decoder_timeout())
                .await
                .map(|d| Box::new(d) as Box<dyn Decoder>)
        } else {
            None
        };
        Self::new(native, config.decoder.fallback_policy)
    }

    /// The decoder that will be asked first for the next frame.
    #[must_use]
    pub fn active(&self) -> DecoderKind {
        if self.use_native() {
            DecoderKind::Native
        } else {
            DecoderKind::Fallback
        }
    }

    /// Whether a native decoder was found at startup.
    #[must_use]
    pub fn has_native(&self) -> bool {
        self.native.is_some()
    }

    /// Whether the fallback has been constructed.
    #[must_use]
    pub fn fallback_loaded(&self) -> bool {
        self.fallback.is_some()
    }

    /// Decode a frame. Failures are logged and yield no payloads.
    pub async fn detect(&mut self, frame: &RgbaImage) -> Vec<DecodedPayload> {
        if self.use_native() {
            if let Some(native) = self.native.as_mut() {
                match native.detect(frame).await {
                    Ok(payloads) => return payloads,
                    Err(e) => {
                        warn!(error = %e, "Native decoder failed, using fallback");
                        self.native_failed = true;
                        if self.policy == FallbackPolicy::Sticky {
                            info!("Fallback decoder promoted for the rest of the session");
                        }
                    }
                }
            }
        }

        let fallback = self.acquire_fallback();
        match fallback.detect(frame).await {
            Ok(payloads) => payloads,
            Err(e) => {
                warn!(error = %e, "Fallback decoder failed");
                Vec::new()
            }
        }
    }

    /// Make sure at least one decoder can run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecoderUnavailable`] if no decoder exists.
    pub fn ensure_available(&self) -> Result<()> {
        if self.native.is_some() || self.fallback.is_some() {
            Ok(())
        } else {
            Err(Error::decoder_unavailable("no QR decoder could be loaded"))
        }
    }

    fn use_native(&self) -> bool {
        self.native.is_some() && !(self.policy == FallbackPolicy::Sticky && self.native_failed)
    }

    fn acquire_fallback(&mut self) -> &mut Box<dyn Decoder> {
        let make = &self.make_fallback;
        self.fallback.get_or_insert_with(|| {
            info!("Loading fallback decoder");
            make()
        })
    }
}
