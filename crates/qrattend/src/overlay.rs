//! Detection overlay: outlines of the symbols found in the current frame.

use image::{Rgba, RgbaImage};

use crate::decoder::{DecodedPayload, Geometry, Point};

/// Outline colour, `#00ffcc`.
pub const STROKE: Rgba<u8> = Rgba([0x00, 0xff, 0xcc, 0xff]);

/// Stroke width for a frame of the given pixel width.
#[must_use]
pub fn line_width(frame_width: u32) -> u32 {
    (frame_width / 400).max(2)
}

/// Shapes detected in the latest frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlay {
    shapes: Vec<Geometry>,
}

impl Overlay {
    /// Create an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the shapes with the geometry of `payloads`.
    pub fn draw(&mut self, payloads: &[DecodedPayload]) {
        self.shapes = payloads.iter().map(|p| p.geometry).collect();
    }

    /// Remove all shapes.
    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    /// Current shapes.
    #[must_use]
    pub fn shapes(&self) -> &[Geometry] {
        &self.shapes
    }

    /// Whether nothing is drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Copy of `frame` with the shapes stroked on top.
    #[must_use]
    pub fn render_onto(&self, frame: &RgbaImage) -> RgbaImage {
        let mut canvas = frame.clone();
        let width = line_width(frame.width());
        for shape in &self.shapes {
            let corners = corners(shape);
            for i in 0..corners.len() {
                let next = corners[(i + 1) % corners.len()];
                stroke_line(&mut canvas, corners[i], next, width);
            }
        }
        canvas
    }
}

fn corners(shape: &Geometry) -> [Point; 4] {
    match shape {
        Geometry::Polygon(points) => *points,
        Geometry::BoundingBox(rect) => {
            let right = rect.x.saturating_add_unsigned(rect.width);
            let bottom = rect.y.saturating_add_unsigned(rect.height);
            [
                Point { x: rect.x, y: rect.y },
                Point { x: right, y: rect.y },
                Point { x: right, y: bottom },
                Point { x: rect.x, y: bottom },
            ]
        }
    }
}

/// Bresenham line, stamping a `width`-sized square at every step.
///
/// Endpoints are clamped to the canvas plus one stroke width.
fn stroke_line(canvas: &mut RgbaImage, from: Point, to: Point, width: u32) {
    let margin = i64::from(width);
    let clamp = |v: i32, dim: u32| i64::from(v).clamp(-margin, i64::from(dim) + margin);
    let (x0, y0) = (clamp(from.x, canvas.width()), clamp(from.y, canvas.height()));
    let (x1, y1) = (clamp(to.x, canvas.width()), clamp(to.y, canvas.height()));

    let (mut x, mut y) = (x0, y0);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        stamp(canvas, x, y, width);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn stamp(canvas: &mut RgbaImage, cx: i64, cy: i64, width: u32) {
    let half = i64::from(width / 2);
    let (w, h) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for y in (cy - half)..(cy - half + i64::from(width)) {
        for x in (cx - half)..(cx - half + i64::from(width)) {
            if (0..w).contains(&x) && (0..h).contains(&y) {
                canvas.put_pixel(x as u32, y as u32, STROKE);
            }
        }
    }
}
