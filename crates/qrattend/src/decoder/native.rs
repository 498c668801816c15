//! Platform scanner backed by the `zbarimg` program.
//!
//! Each frame is written to a temporary PNG and handed to the scanner with
//! QR-only symbology and XML output. Exit status 4 means "no symbols found".

use std::path::Path;
use std::process::Output;
use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine as _;
use image::{ImageFormat, RgbaImage};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use super::{DecodedPayload, Decoder, DecoderError, DecoderKind, Geometry, Point, Rect};

/// Exit status zbarimg uses when an image contained no symbols.
const EXIT_NO_SYMBOLS: i32 = 4;

static SYMBOL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<symbol\b[^>]*>(.*?)</symbol>").expect("Invalid regex pattern")
});

static POLYGON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<polygon\s+points=['"]([^'"]*)['"]"#).expect("Invalid regex pattern")
});

static DATA_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<data([^>]*)>(.*?)</data>").expect("Invalid regex pattern"));

static CDATA_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("Invalid regex pattern"));

/// QR detector that shells out to the platform scanner.
#[derive(Debug, Clone)]
pub struct NativeDetector {
    program: String,
    timeout: Duration,
}

impl NativeDetector {
    /// Create a detector without probing.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Check whether `program` runs. Returns `None` if it does not.
    pub async fn probe(program: &str, timeout: Duration) -> Option<Self> {
        let mut command = Command::new(program);
        command.arg("--version").kill_on_drop(true);
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!(%program, %version, "Native QR scanner available");
                Some(Self::new(program, timeout))
            }
            Ok(Ok(output)) => {
                debug!(%program, status = %output.status, "Native QR scanner probe failed");
                None
            }
            Ok(Err(e)) => {
                debug!(%program, error = %e, "Native QR scanner not found");
                None
            }
            Err(_) => {
                debug!(%program, "Native QR scanner probe timed out");
                None
            }
        }
    }

    /// The scanner program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, path: &Path) -> Result<Output, DecoderError> {
        let mut command = Command::new(&self.program);
        command
            .args(["--xml", "--quiet", "-Sdisable", "-Sqrcode.enable"])
            .arg(path)
            .kill_on_drop(true);
        tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| DecoderError::Timeout(self.timeout))?
            .map_err(DecoderError::Io)
    }
}

#[async_trait::async_trait]
impl Decoder for NativeDetector {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Native
    }

    async fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<DecodedPayload>, DecoderError> {
        let file = tempfile::Builder::new()
            .prefix("qrattend-frame-")
            .suffix(".png")
            .tempfile()?;
        frame.save_with_format(file.path(), ImageFormat::Png)?;

        let output = self.run(file.path()).await?;
        match output.status.code() {
            Some(0) => parse_xml(&String::from_utf8_lossy(&output.stdout), frame),
            Some(EXIT_NO_SYMBOLS) => Ok(Vec::new()),
            _ => Err(DecoderError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Parse zbarimg `--xml` output into payloads.
///
/// Symbols without a polygon are located at the whole frame.
fn parse_xml(xml: &str, frame: &RgbaImage) -> Result<Vec<DecodedPayload>, DecoderError> {
    let whole_frame = Rect {
        x: 0,
        y: 0,
        width: frame.width(),
        height: frame.height(),
    };

    let mut payloads = Vec::new();
    for symbol in SYMBOL_PATTERN.captures_iter(xml) {
        let body = &symbol[1];
        let Some(data) = DATA_PATTERN.captures(body) else {
            continue;
        };
        let text = decode_data(&data[1], &data[2])?;

        let rect = POLYGON_PATTERN
            .captures(body)
            .and_then(|c| Rect::enclosing(&parse_points(&c[1])))
            .unwrap_or(whole_frame);

        payloads.push(DecodedPayload {
            text,
            geometry: Geometry::BoundingBox(rect),
        });
    }
    Ok(payloads)
}

/// Join CDATA sections and undo base64 if the scanner used it.
fn decode_data(attributes: &str, body: &str) -> Result<String, DecoderError> {
    let raw: String = if body.contains("<![CDATA[") {
        CDATA_PATTERN
            .captures_iter(body)
            .map(|c| c[1].to_string())
            .collect()
    } else {
        body.to_string()
    };

    if attributes.contains("base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|e| DecoderError::Failed(format!("bad base64 payload: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(raw)
    }
}

/// Parse `+x,y +x,y ...` polygon points.
fn parse_points(points: &str) -> Vec<Point> {
    points
        .split_whitespace()
        .filter_map(|pair| {
            let (x, y) = pair.split_once(',')?;
            Some(Point {
                x: x.trim_start_matches('+').parse().ok()?,
                y: y.trim_start_matches('+').parse().ok()?,
            })
        })
        .collect()
}
