//! Abstract 2-D raster surface. Built on top of `image::RgbaImage` with
//! hand-written Porter-Duff compositing math, since nothing in this
//! codebase's dependency lineage provides antialiased vector fills or named
//! blend operators for raster buffers — the §6 canvas contract only requires
//! RGBA surfaces, affine transforms and polygon/compositing primitives, all
//! of which are a few dozen lines of arithmetic on top of a pixel buffer.

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use serde::Deserialize;

use crate::geometry::Vec2;

pub type Color = Rgba<u8>;

pub const TRANSPARENT: Color = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendOperator {
    Over,
    Xor,
    Multiply,
    In,
    Out,
    DestIn,
    DestOut,
}

impl Default for BlendOperator {
    fn default() -> Self {
        BlendOperator::Over
    }
}

pub struct Canvas {
    width: u32,
    height: u32,
    dpi: f64,
    /// World-space offset of pixel (0, 0), in pixels (i.e. `offset_in * dpi`).
    offset_px: Vec2,
    invert_y: bool,
    mode: BlendOperator,
    buffer: RgbaImage,
}

impl Canvas {
    pub fn create(dims_px: (u32, u32), dpi: f64, offset_px: Vec2, invert_y: bool) -> Self {
        let (width, height) = dims_px;
        Self {
            width: width.max(1),
            height: height.max(1),
            dpi,
            offset_px,
            invert_y,
            mode: BlendOperator::Over,
            buffer: RgbaImage::from_pixel(width.max(1), height.max(1), TRANSPARENT),
        }
    }

    pub fn create_inches(dims_in: Vec2, dpi: f64, offset_in: Vec2, invert_y: bool) -> Self {
        let width = (dims_in.x * dpi).ceil().max(1.0) as u32;
        let height = (dims_in.y * dpi).ceil().max(1.0) as u32;
        Self::create((width, height), dpi, offset_in * dpi, invert_y)
    }

    /// Builds a canvas large enough to hold every input canvas at its own
    /// world position; all inputs must share a DPI.
    pub fn create_composition(canvases: &[&Canvas], invert_y: bool) -> Self {
        assert!(!canvases.is_empty(), "create_composition needs at least one canvas");
        let dpi = canvases[0].dpi;
        assert!(
            canvases.iter().all(|c| (c.dpi - dpi).abs() < 1e-9),
            "create_composition requires identical DPI across all inputs"
        );

        let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for canvas in canvases {
            let corner_a = canvas.pixel_to_world(0.0, 0.0);
            let corner_b = canvas.pixel_to_world(canvas.width as f64, canvas.height as f64);
            min = min.min(corner_a).min(corner_b);
            max = max.max(corner_a).max(corner_b);
        }

        Self::create_inches(max - min, dpi, min, invert_y)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    pub fn set_mode(&mut self, mode: BlendOperator) {
        self.mode = mode;
    }

    pub fn mode(&self) -> BlendOperator {
        self.mode
    }

    pub fn fill(&mut self, color: Color) {
        for pixel in self.buffer.pixels_mut() {
            *pixel = color;
        }
    }

    /// Maps a world-space point to fractional pixel coordinates.
    pub fn world_to_pixel(&self, world: Vec2) -> (f64, f64) {
        let px = world.x * self.dpi - self.offset_px.x;
        let raw_y = world.y * self.dpi - self.offset_px.y;
        let py = if self.invert_y {
            self.height as f64 - raw_y
        } else {
            raw_y
        };
        (px, py)
    }

    fn pixel_to_world(&self, px: f64, py: f64) -> Vec2 {
        let raw_y = if self.invert_y {
            self.height as f64 - py
        } else {
            py
        };
        Vec2::new(
            (px + self.offset_px.x) / self.dpi,
            (raw_y + self.offset_px.y) / self.dpi,
        )
    }

    /// Paints `self` centered at `world_point` on `dst`, using `dst`'s
    /// current mode. Used to stamp an aperture shape at a trajectory point.
    pub fn stamp_on(&self, dst: &mut Canvas, world_point: Vec2) {
        let (cx, cy) = dst.world_to_pixel(world_point);
        let half_w = self.width as f64 / 2.0;
        let half_h = self.height as f64 / 2.0;
        let op = dst.mode;

        for sy in 0..self.height {
            for sx in 0..self.width {
                let src = *self.buffer.get_pixel(sx, sy);
                if src.0[3] == 0 {
                    continue;
                }
                let dx = (cx - half_w + sx as f64).round();
                let dy = (cy - half_h + sy as f64).round();
                if dx < 0.0 || dy < 0.0 {
                    continue;
                }
                let (dx, dy) = (dx as u32, dy as u32);
                if dx >= dst.width || dy >= dst.height {
                    continue;
                }
                let dest = *dst.buffer.get_pixel(dx, dy);
                dst.buffer.put_pixel(dx, dy, blend(op, src, dest));
            }
        }
    }

    /// Fills a (possibly multi-subpath) polygon in world coordinates using
    /// the even-odd rule, with `self`'s current mode.
    pub fn fill_polygon(&mut self, subpaths: &[Vec<Vec2>], color: Color) {
        let op = self.mode;
        let pixel_subpaths: Vec<Vec<(f64, f64)>> = subpaths
            .iter()
            .filter(|path| path.len() >= 2)
            .map(|path| path.iter().map(|p| self.world_to_pixel(*p)).collect())
            .collect();
        if pixel_subpaths.is_empty() {
            return;
        }

        for y in 0..self.height {
            let scan_y = y as f64 + 0.5;
            let mut crossings: Vec<f64> = Vec::new();
            for path in &pixel_subpaths {
                let n = path.len();
                for i in 0..n {
                    let (x0, y0) = path[i];
                    let (x1, y1) = path[(i + 1) % n];
                    if (y0 <= scan_y && y1 > scan_y) || (y1 <= scan_y && y0 > scan_y) {
                        let t = (scan_y - y0) / (y1 - y0);
                        crossings.push(x0 + t * (x1 - x0));
                    }
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
            for pair in crossings.chunks_exact(2) {
                let x_start = pair[0].round().max(0.0) as u32;
                let x_end = (pair[1].round().max(0.0) as u32).min(self.width);
                for x in x_start..x_end {
                    let dest = *self.buffer.get_pixel(x, y);
                    self.buffer.put_pixel(x, y, blend(op, color, dest));
                }
            }
        }
    }

    /// Blends the whole of `self` onto `dst` with an explicit operator,
    /// mapping pixels through their shared world-coordinate system.
    pub fn compose_onto(&self, dst: &mut Canvas, operator: BlendOperator) {
        assert!(
            (self.dpi - dst.dpi).abs() < 1e-9,
            "compose_onto requires equal DPI"
        );
        for sy in 0..self.height {
            for sx in 0..self.width {
                let src = *self.buffer.get_pixel(sx, sy);
                if src.0[3] == 0 {
                    continue;
                }
                let world = self.pixel_to_world(sx as f64 + 0.5, sy as f64 + 0.5);
                let (dxf, dyf) = dst.world_to_pixel(world);
                let dx = dxf.floor();
                let dy = dyf.floor();
                if dx < 0.0 || dy < 0.0 {
                    continue;
                }
                let (dx, dy) = (dx as u32, dy as u32);
                if dx >= dst.width || dy >= dst.height {
                    continue;
                }
                let dest = *dst.buffer.get_pixel(dx, dy);
                dst.buffer.put_pixel(dx, dy, blend(operator, src, dest));
            }
        }
    }

    pub fn alpha_polarize(&mut self, threshold: u8) {
        for pixel in self.buffer.pixels_mut() {
            if pixel.0[3] > threshold {
                pixel.0[3] = 255;
            } else {
                *pixel = TRANSPARENT;
            }
        }
    }

    pub fn export_png(&self, path: &Path) -> Result<()> {
        self.buffer
            .save(path)
            .with_context(|| format!("failed to write PNG to {}", path.display()))
    }
}

/// Porter-Duff compositing in premultiplied-alpha space. `multiply` follows
/// the W3C compositing formula for a separable blend mode combined with
/// source-over.
fn blend(operator: BlendOperator, src: Color, dest: Color) -> Color {
    let (cs, as_) = premultiply(src);
    let (cd, ad) = premultiply(dest);

    let (co, ao) = match operator {
        BlendOperator::Over => (add(cs, scale(cd, 1.0 - as_)), as_ + ad * (1.0 - as_)),
        BlendOperator::Xor => (
            add(scale(cs, 1.0 - ad), scale(cd, 1.0 - as_)),
            as_ * (1.0 - ad) + ad * (1.0 - as_),
        ),
        BlendOperator::In => (scale(cs, ad), as_ * ad),
        BlendOperator::Out => (scale(cs, 1.0 - ad), as_ * (1.0 - ad)),
        BlendOperator::DestIn => (scale(cd, as_), ad * as_),
        BlendOperator::DestOut => (scale(cd, 1.0 - as_), ad * (1.0 - as_)),
        BlendOperator::Multiply => {
            let product = [cs[0] * cd[0], cs[1] * cd[1], cs[2] * cd[2]];
            (
                add(add(scale(cs, 1.0 - ad), scale(cd, 1.0 - as_)), product),
                as_ + ad - as_ * ad,
            )
        }
    };

    unpremultiply(co, ao)
}

fn premultiply(color: Color) -> ([f64; 3], f64) {
    let a = color.0[3] as f64 / 255.0;
    (
        [
            color.0[0] as f64 / 255.0 * a,
            color.0[1] as f64 / 255.0 * a,
            color.0[2] as f64 / 255.0 * a,
        ],
        a,
    )
}

fn unpremultiply(color: [f64; 3], alpha: f64) -> Color {
    if alpha <= 1e-9 {
        return TRANSPARENT;
    }
    let to_u8 = |c: f64| ((c / alpha).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([to_u8(color[0]), to_u8(color[1]), to_u8(color[2]), (alpha.clamp(0.0, 1.0) * 255.0).round() as u8])
}

fn scale(c: [f64; 3], k: f64) -> [f64; 3] {
    [c[0] * k, c[1] * k, c[2] * k]
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_to_pixel_round_trips_through_pixel_to_world() {
        let canvas = Canvas::create_inches(Vec2::new(1.0, 1.0), 100.0, Vec2::new(0.0, 0.0), true);
        let world = Vec2::new(0.4, 0.6);
        let (px, py) = canvas.world_to_pixel(world);
        let back = canvas.pixel_to_world(px, py);
        assert!(back.approx_eq(&world));
    }

    #[test]
    fn fill_sets_every_pixel() {
        let mut canvas = Canvas::create((4, 4), 1.0, Vec2::ZERO, false);
        canvas.fill(Rgba([10, 20, 30, 255]));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(*canvas.buffer.get_pixel(x, y), Rgba([10, 20, 30, 255]));
            }
        }
    }

    #[test]
    fn stamp_on_centers_opaque_pixel_at_world_point() {
        let mut aperture = Canvas::create((3, 3), 100.0, Vec2::ZERO, false);
        aperture.fill(Rgba([255, 0, 0, 255]));
        let mut target = Canvas::create_inches(Vec2::new(1.0, 1.0), 100.0, Vec2::ZERO, false);
        aperture.stamp_on(&mut target, Vec2::new(0.5, 0.5));
        let (cx, cy) = target.world_to_pixel(Vec2::new(0.5, 0.5));
        let pixel = *target.buffer.get_pixel(cx.round() as u32, cy.round() as u32);
        assert_eq!(pixel, Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn alpha_polarize_snaps_alpha_to_extremes() {
        let mut canvas = Canvas::create((2, 1), 1.0, Vec2::ZERO, false);
        canvas.buffer.put_pixel(0, 0, Rgba([1, 2, 3, 40]));
        canvas.buffer.put_pixel(1, 0, Rgba([1, 2, 3, 200]));
        canvas.alpha_polarize(30);
        assert_eq!(*canvas.buffer.get_pixel(0, 0), TRANSPARENT);
        assert_eq!(*canvas.buffer.get_pixel(1, 0), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn over_onto_opaque_background_yields_source_color() {
        let src = Rgba([200, 0, 0, 255]);
        let dest = Rgba([0, 200, 0, 255]);
        assert_eq!(blend(BlendOperator::Over, src, dest), src);
    }

    #[test]
    fn compose_onto_requires_equal_dpi() {
        let a = Canvas::create((1, 1), 100.0, Vec2::ZERO, false);
        let b = Canvas::create((1, 1), 50.0, Vec2::ZERO, false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut b = b;
            a.compose_onto(&mut b, BlendOperator::Over);
        }));
        assert!(result.is_err());
    }
}
