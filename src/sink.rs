//! The Sink capability: the full event vocabulary an interpreter may emit,
//! expressed as a trait with no-op defaults rather than a base class with
//! overridable methods, plus the two concrete implementations used by the
//! two-pass pipeline.

use log::warn;

use crate::aperture::{ApertureDefinition, ApertureRenderer};
use crate::canvas::{BlendOperator, Canvas, Color};
use crate::geometry::Vec2;
use crate::sampler::GeoSampler;

pub trait Sink {
    fn begin_path(&mut self) {}
    fn end_path(&mut self) {}
    fn region_move(&mut self, _pt: Vec2) {}
    fn region_line(&mut self, _pt: Vec2) {}
    fn region_arc(&mut self, _center: Vec2, _end: Vec2, _clockwise: bool) {}
    fn close_contour(&mut self) {}

    fn drawmode_dark(&mut self) {}
    fn drawmode_clear(&mut self) {}

    fn select_aperture(&mut self, _def: &ApertureDefinition) {}

    fn line(&mut self, _a: Vec2, _b: Vec2) {}
    fn arc_cw(&mut self, _a: Vec2, _b: Vec2, _c: Vec2) {}
    fn arc_ccw(&mut self, _a: Vec2, _b: Vec2, _c: Vec2) {}
    fn circle(&mut self, _c: Vec2, _r: f64) {}
    fn flash_at(&mut self, _p: Vec2) {}

    fn switch_drill_tool(&mut self, _diameter: f64) {}
    fn drill(&mut self, _p: Vec2) {}
}

/// Bounding-box accumulator: pads every point by half the current
/// aperture's physical extent.
#[derive(Default)]
pub struct ExtentsSink {
    min: Option<Vec2>,
    max: Option<Vec2>,
    pad: Vec2,
    region_path: Vec<Vec2>,
    region_active: bool,
    sampler: GeoSampler,
}

impl ExtentsSink {
    pub fn new() -> Self {
        Self {
            pad: Vec2::ZERO,
            sampler: GeoSampler::new(1.0),
            ..Default::default()
        }
    }

    pub fn min_pt(&self) -> Option<Vec2> {
        self.min
    }

    pub fn max_pt(&self) -> Option<Vec2> {
        self.max
    }

    fn expand(&mut self, point: Vec2, pad: Vec2) {
        let lo = point - pad;
        let hi = point + pad;
        self.min = Some(self.min.map_or(lo, |m| m.min(lo)));
        self.max = Some(self.max.map_or(hi, |m| m.max(hi)));
    }
}

impl Sink for ExtentsSink {
    fn begin_path(&mut self) {
        self.region_path.clear();
        self.region_active = true;
    }

    fn end_path(&mut self) {
        let path = std::mem::take(&mut self.region_path);
        let sampler = self.sampler;
        for window in path.windows(2) {
            sampler.line(window[0], window[1], |p| self.expand(p, Vec2::ZERO));
        }
        if let Some(first) = path.first() {
            self.expand(*first, Vec2::ZERO);
        }
        self.region_active = false;
    }

    fn region_move(&mut self, pt: Vec2) {
        self.region_path.push(pt);
    }

    fn region_line(&mut self, pt: Vec2) {
        self.region_path.push(pt);
    }

    fn select_aperture(&mut self, def: &ApertureDefinition) {
        self.pad = ApertureRenderer::physical_extents(def) / 2.0;
    }

    fn switch_drill_tool(&mut self, diameter: f64) {
        self.pad = Vec2::new(diameter / 2.0, diameter / 2.0);
    }

    fn line(&mut self, a: Vec2, b: Vec2) {
        self.expand(a, self.pad);
        self.expand(b, self.pad);
    }

    fn arc_cw(&mut self, a: Vec2, b: Vec2, c: Vec2) {
        self.arc_ccw(b, a, c);
    }

    fn arc_ccw(&mut self, a: Vec2, b: Vec2, c: Vec2) {
        let radius = (a - c).length();
        let from = (a - c).angle();
        let to = (b - c).angle();
        let pad = self.pad;
        let mut points = Vec::new();
        self.sampler.arc(c, radius, Some(from), to, |p| points.push(p));
        for p in points {
            self.expand(p, pad);
        }
    }

    fn circle(&mut self, c: Vec2, r: f64) {
        let pad = self.pad;
        self.expand(c - Vec2::new(r, r), pad);
        self.expand(c + Vec2::new(r, r), pad);
    }

    fn flash_at(&mut self, p: Vec2) {
        self.expand(p, self.pad);
    }

    fn drill(&mut self, p: Vec2) {
        self.expand(p, self.pad);
    }
}

enum PathCmd {
    MoveTo(Vec2),
    LineTo(Vec2),
}

/// Stamps the current aperture along each primitive onto a target canvas.
pub struct RasterSink<'a> {
    target: &'a mut Canvas,
    color: Color,
    aperture: Option<Canvas>,
    path: Vec<PathCmd>,
    sampler: GeoSampler,
}

impl<'a> RasterSink<'a> {
    pub fn new(target: &'a mut Canvas, color: Color) -> Self {
        Self {
            target,
            color,
            aperture: None,
            path: Vec::new(),
            sampler: GeoSampler::new(1.0),
        }
    }

    fn stamp(&mut self, p: Vec2) {
        let target = &mut *self.target;
        if let Some(aperture) = &self.aperture {
            aperture.stamp_on(target, p);
        } else {
            warn!("attempted to draw with no aperture selected");
        }
    }
}

impl Sink for RasterSink<'_> {
    fn begin_path(&mut self) {
        self.path.clear();
    }

    fn end_path(&mut self) {
        let path = std::mem::take(&mut self.path);
        let mut points: Vec<Vec2> = Vec::with_capacity(path.len());
        for cmd in path {
            match cmd {
                PathCmd::MoveTo(p) | PathCmd::LineTo(p) => points.push(p),
            }
        }
        if points.len() >= 2 {
            self.target.fill_polygon(&[points], self.color);
        }
    }

    fn region_move(&mut self, pt: Vec2) {
        self.path.push(PathCmd::MoveTo(pt));
    }

    fn region_line(&mut self, pt: Vec2) {
        self.path.push(PathCmd::LineTo(pt));
    }

    fn close_contour(&mut self) {
        if let Some(PathCmd::MoveTo(start) | PathCmd::LineTo(start)) = self.path.first() {
            let start = *start;
            self.path.push(PathCmd::LineTo(start));
        }
    }

    fn drawmode_dark(&mut self) {
        self.target.set_mode(BlendOperator::Over);
    }

    fn drawmode_clear(&mut self) {
        self.target.set_mode(BlendOperator::Xor);
    }

    fn select_aperture(&mut self, def: &ApertureDefinition) {
        self.aperture = Some(ApertureRenderer::render(def, self.target.dpi(), self.color));
    }

    fn line(&mut self, a: Vec2, b: Vec2) {
        let mut points = Vec::new();
        self.sampler.line(a, b, |p| points.push(p));
        for p in points {
            self.stamp(p);
        }
    }

    fn arc_cw(&mut self, a: Vec2, b: Vec2, c: Vec2) {
        self.arc_ccw(b, a, c);
    }

    fn arc_ccw(&mut self, a: Vec2, b: Vec2, c: Vec2) {
        let radius = (a - c).length();
        let from = (a - c).angle();
        let to = (b - c).angle();
        let mut points = Vec::new();
        self.sampler.arc(c, radius, Some(from), to, |p| points.push(p));
        for p in points {
            self.stamp(p);
        }
    }

    fn circle(&mut self, c: Vec2, r: f64) {
        let mut points = Vec::new();
        self.sampler.circle(c, r, |p| points.push(p));
        for p in points {
            self.stamp(p);
        }
    }

    fn flash_at(&mut self, p: Vec2) {
        self.stamp(p);
    }

    fn switch_drill_tool(&mut self, diameter: f64) {
        self.aperture = Some(ApertureRenderer::render(
            &ApertureDefinition::Circle { diameter },
            self.target.dpi(),
            self.color,
        ));
    }

    fn drill(&mut self, p: Vec2) {
        self.stamp(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_sink_reports_none_when_empty() {
        let sink = ExtentsSink::new();
        assert!(sink.min_pt().is_none());
        assert!(sink.max_pt().is_none());
    }

    #[test]
    fn extents_sink_pads_by_half_aperture() {
        let mut sink = ExtentsSink::new();
        sink.select_aperture(&ApertureDefinition::Circle { diameter: 0.05 });
        sink.flash_at(Vec2::new(0.01, 0.01));
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        assert!((min.x - (0.01 - 0.025)).abs() < 1e-9);
        assert!((max.x - (0.01 + 0.025)).abs() < 1e-9);
    }

    #[test]
    fn raster_sink_without_aperture_does_not_panic() {
        let mut canvas = Canvas::create((10, 10), 100.0, Vec2::ZERO, false);
        let mut sink = RasterSink::new(&mut canvas, Color::from([0, 0, 0, 255]));
        sink.flash_at(Vec2::new(0.01, 0.01));
    }

    #[test]
    fn close_contour_appends_a_return_to_start() {
        let mut canvas = Canvas::create((10, 10), 100.0, Vec2::ZERO, false);
        let mut sink = RasterSink::new(&mut canvas, Color::from([0, 0, 0, 255]));
        sink.begin_path();
        sink.region_move(Vec2::new(0.0, 0.0));
        sink.region_line(Vec2::new(0.05, 0.0));
        sink.close_contour();
        assert_eq!(sink.path.len(), 3);
    }
}
