//! Built-in software QR decoder.

use image::{GrayImage, RgbaImage};
use tracing::debug;

use super::{DecodedPayload, Decoder, DecoderError, DecoderKind, Geometry, Point};

/// Pure-Rust decoder, always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackDecoder;

impl FallbackDecoder {
    /// Create the decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Decoder for FallbackDecoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Fallback
    }

    async fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<DecodedPayload>, DecoderError> {
        let gray = image::imageops::grayscale(frame);
        tokio::task::spawn_blocking(move || decode_gray(&gray))
            .await
            .map_err(|e| DecoderError::Failed(format!("decoder task failed: {e}")))
    }
}

/// Locate and decode every QR grid in a grayscale raster.
#[allow(clippy::cast_possible_truncation)]
fn decode_gray(gray: &GrayImage) -> Vec<DecodedPayload> {
    let (width, height) = gray.dimensions();
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            gray.get_pixel(x as u32, y as u32).0[0]
        });

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| match grid.decode() {
            Ok((_meta, text)) => Some(DecodedPayload {
                text,
                geometry: Geometry::Polygon(grid.bounds.map(|p| Point { x: p.x, y: p.y })),
            }),
            Err(e) => {
                debug!(error = ?e, "Skipping undecodable grid");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};
    use qrcode::{Color, QrCode};

    const MODULE_PX: u32 = 6;
    const QUIET_ZONE: u32 = 4;

    /// Render `text` as a QR symbol on a white background.
    fn qr_image(text: &str) -> GrayImage {
        let code = QrCode::new(text.as_bytes()).unwrap();
        let modules = u32::try_from(code.width()).unwrap();
        let colors = code.to_colors();
        let side = (modules + 2 * QUIET_ZONE) * MODULE_PX;

        GrayImage::from_fn(side, side, |x, y| {
            let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
            let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
                && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
            if !inside {
                return Luma([255]);
            }
            let index = ((my - QUIET_ZONE) * modules + (mx - QUIET_ZONE)) as usize;
            match colors[index] {
                Color::Dark => Luma([0]),
                Color::Light => Luma([255]),
            }
        })
    }

    #[test]
    fn test_decodes_symbol_with_corners() {
        let gray = qr_image("EMP-42");
        let side = i32::try_from(gray.width()).unwrap();

        let payloads = decode_gray(&gray);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].text, "EMP-42");

        let Geometry::Polygon(corners) = payloads[0].geometry else {
            panic!("expected polygon geometry, got {:?}", payloads[0].geometry);
        };
        for corner in corners {
            assert!((0..=side).contains(&corner.x), "{corner:?}");
            assert!((0..=side).contains(&corner.y), "{corner:?}");
        }
        // The symbol sits inside the quiet zone
        let bounds = payloads[0].geometry.bounding_box();
        let margin = i32::try_from(QUIET_ZONE * MODULE_PX).unwrap();
        let slack = i32::try_from(MODULE_PX).unwrap();
        assert!((margin - slack..=margin + slack).contains(&bounds.x), "{bounds:?}");
        assert!((margin - slack..=margin + slack).contains(&bounds.y), "{bounds:?}");
    }

    #[tokio::test]
    async fn test_detect_decodes_rgba_frame() {
        let gray = qr_image("https://example.com/badge/7");
        let frame = image::DynamicImage::ImageLuma8(gray).into_rgba8();

        let mut decoder = FallbackDecoder::new();
        let payloads = decoder.detect(&frame).await.unwrap();
        let texts: Vec<_> = payloads.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, ["https://example.com/badge/7"]);
        assert!(matches!(payloads[0].geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_blank_image_has_no_payloads() {
        let gray = GrayImage::from_pixel(120, 80, Luma([255]));
        assert!(decode_gray(&gray).is_empty());
    }

    #[test]
    fn test_noise_has_no_payloads() {
        let gray = GrayImage::from_fn(64, 64, |x, y| {
            if (x / 3 + y / 5) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        assert!(decode_gray(&gray).is_empty());
    }

    #[tokio::test]
    async fn test_detect_on_rgba_frame() {
        let mut decoder = FallbackDecoder::new();
        assert_eq!(decoder.kind(), DecoderKind::Fallback);
        let frame = RgbaImage::from_pixel(32, 32, Rgba([10, 200, 30, 255]));
        assert!(decoder.detect(&frame).await.unwrap().is_empty());
    }
}
