//! Aperture shapes: the tagged variant over {Circle, Rectangle, Obround,
//! Macro} described in the data model, plus a renderer that turns a
//! definition into a small stamped [`Canvas`] or a bounding rectangle.

use log::warn;

use crate::canvas::{Canvas, Color};
use crate::geometry::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApertureMacroPrimitiveCode {
    Comment,
    Circle,
    VectorLine,
    CenterLine,
    Outline,
    Polygon,
    Moire,
    Thermal,
}

impl ApertureMacroPrimitiveCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Comment),
            1 => Some(Self::Circle),
            20 => Some(Self::VectorLine),
            21 => Some(Self::CenterLine),
            4 => Some(Self::Outline),
            5 => Some(Self::Polygon),
            6 => Some(Self::Moire),
            7 => Some(Self::Thermal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApertureMacroPrimitive {
    pub code: ApertureMacroPrimitiveCode,
    pub params: Vec<String>,
}

pub type ApertureMacro = Vec<ApertureMacroPrimitive>;

#[derive(Debug, Clone)]
pub enum ApertureDefinition {
    Circle { diameter: f64 },
    Rectangle { width: f64, height: f64 },
    Obround { width: f64, height: f64 },
    Macro { name: String, primitives: ApertureMacro },
}

impl ApertureDefinition {
    /// A missing aperture is substituted with this placeholder rather than
    /// aborting interpretation (§7 class 2).
    pub fn missing_placeholder() -> Self {
        ApertureDefinition::Circle { diameter: 0.001 }
    }
}

pub struct ApertureRenderer;

impl ApertureRenderer {
    /// Renders `def` into a small canvas filled with `color` at `dpi`.
    pub fn render(def: &ApertureDefinition, dpi: f64, color: Color) -> Canvas {
        match def {
            ApertureDefinition::Circle { diameter } => Self::render_circle(*diameter, dpi, color),
            ApertureDefinition::Rectangle { width, height } => {
                Self::render_rectangle(*width, *height, dpi, color)
            }
            ApertureDefinition::Obround { width, height } => {
                Self::render_obround(*width, *height, dpi, color)
            }
            ApertureDefinition::Macro { name, primitives } => {
                Self::render_macro(name, primitives, dpi, color)
            }
        }
    }

    fn render_circle(diameter: f64, dpi: f64, color: Color) -> Canvas {
        let radius_px = diameter * dpi / 2.0;
        let side = 2 * radius_px.ceil() as u32 + 4;
        let mut canvas = Canvas::create((side, side), dpi, Vec2::ZERO, false);
        fill_circle(&mut canvas, side as f64 / 2.0, side as f64 / 2.0, radius_px, color);
        canvas
    }

    fn render_rectangle(width: f64, height: f64, dpi: f64, color: Color) -> Canvas {
        let w = (width * dpi).ceil().max(1.0) as u32;
        let h = (height * dpi).ceil().max(1.0) as u32;
        let mut canvas = Canvas::create((w, h), dpi, Vec2::ZERO, false);
        canvas.fill(color);
        canvas
    }

    fn render_obround(width: f64, height: f64, dpi: f64, color: Color) -> Canvas {
        let radius = width.min(height) / 2.0;
        let radius_px = radius * dpi;
        let w = (width * dpi).ceil() as u32 + 2;
        let h = (height * dpi).ceil() as u32 + 2;
        let mut canvas = Canvas::create((w, h), dpi, Vec2::ZERO, false);

        let (rect_w, rect_h) = if width >= height {
            (((width - height) * dpi).max(0.0), height * dpi)
        } else {
            (width * dpi, ((height - width) * dpi).max(0.0))
        };

        let cx = w as f64 / 2.0;
        let cy = h as f64 / 2.0;

        // The two semicircular caps.
        if width >= height {
            fill_circle(&mut canvas, cx - rect_w / 2.0, cy, radius_px, color);
            fill_circle(&mut canvas, cx + rect_w / 2.0, cy, radius_px, color);
        } else {
            fill_circle(&mut canvas, cx, cy - rect_h / 2.0, radius_px, color);
            fill_circle(&mut canvas, cx, cy + rect_h / 2.0, radius_px, color);
        }

        // The connecting rectangle.
        let (x0, x1, y0, y1) = if width >= height {
            (
                (cx - rect_w / 2.0).round() as i64,
                (cx + rect_w / 2.0).round() as i64,
                (cy - radius_px).round() as i64,
                (cy + radius_px).round() as i64,
            )
        } else {
            (
                (cx - radius_px).round() as i64,
                (cx + radius_px).round() as i64,
                (cy - rect_h / 2.0).round() as i64,
                (cy + rect_h / 2.0).round() as i64,
            )
        };
        fill_rect(&mut canvas, x0, x1, y0, y1, color);

        canvas
    }

    fn render_macro(name: &str, primitives: &ApertureMacro, dpi: f64, color: Color) -> Canvas {
        // Only Circle primitives are actually rendered; everything else
        // (including the unsupported primitive kinds altogether) falls
        // through to a small placeholder circle rather than aborting.
        for primitive in primitives {
            if primitive.code == ApertureMacroPrimitiveCode::Circle {
                if let Some(diameter) = primitive.params.get(1).and_then(|s| s.parse::<f64>().ok()) {
                    return Self::render_circle(diameter, dpi, color);
                }
            }
        }
        warn!("aperture macro {name:?}: no renderable primitive, emitting placeholder");
        let side = 5u32;
        let mut canvas = Canvas::create((side, side), dpi, Vec2::ZERO, false);
        fill_circle(&mut canvas, side as f64 / 2.0, side as f64 / 2.0, side as f64 / 2.0, color);
        canvas
    }

    /// Bounding rectangle in inches, without rasterizing.
    pub fn physical_extents(def: &ApertureDefinition) -> Vec2 {
        match def {
            ApertureDefinition::Circle { diameter } => Vec2::new(*diameter, *diameter),
            ApertureDefinition::Rectangle { width, height } => Vec2::new(*width, *height),
            ApertureDefinition::Obround { width, height } => Vec2::new(*width, *height),
            ApertureDefinition::Macro { primitives, .. } => {
                for primitive in primitives {
                    if primitive.code == ApertureMacroPrimitiveCode::Circle {
                        if let Some(d) = primitive.params.get(1).and_then(|s| s.parse::<f64>().ok()) {
                            return Vec2::new(d, d);
                        }
                    }
                }
                let side = 5.0 / 1000.0; // conservative placeholder, matches render_macro's floor
                Vec2::new(side, side)
            }
        }
    }
}

fn fill_circle(canvas: &mut Canvas, cx: f64, cy: f64, radius: f64, color: Color) {
    let subpath: Vec<Vec2> = (0..64)
        .map(|i| {
            let angle = i as f64 / 64.0 * std::f64::consts::TAU;
            Vec2::new(cx + radius * angle.cos(), cy + radius * angle.sin())
        })
        .collect();
    // These points are already in pixel space; build a throwaway canvas
    // view by drawing directly with a 1:1 world-to-pixel canvas.
    let world_subpath: Vec<Vec2> = subpath.iter().map(|p| *p / canvas.dpi()).collect();
    canvas.fill_polygon(&[world_subpath], color);
}

fn fill_rect(canvas: &mut Canvas, x0: i64, x1: i64, y0: i64, y1: i64, color: Color) {
    let dpi = canvas.dpi();
    let subpath = vec![
        Vec2::new(x0 as f64, y0 as f64) / dpi,
        Vec2::new(x1 as f64, y0 as f64) / dpi,
        Vec2::new(x1 as f64, y1 as f64) / dpi,
        Vec2::new(x0 as f64, y1 as f64) / dpi,
    ];
    canvas.fill_polygon(&[subpath], color);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_render_never_clips_physical_extents() {
        let def = ApertureDefinition::Circle { diameter: 0.05 };
        let dpi = 1000.0;
        let canvas = ApertureRenderer::render(&def, dpi, Color::from([255, 255, 255, 255]));
        let extents = ApertureRenderer::physical_extents(&def);
        assert!(canvas.width() as f64 >= extents.x * dpi);
        assert!(canvas.height() as f64 >= extents.y * dpi);
    }

    #[test]
    fn rectangle_extents_match_dimensions() {
        let def = ApertureDefinition::Rectangle { width: 0.02, height: 0.01 };
        assert_eq!(ApertureRenderer::physical_extents(&def), Vec2::new(0.02, 0.01));
    }

    #[test]
    fn missing_placeholder_is_a_tiny_circle() {
        let def = ApertureDefinition::missing_placeholder();
        match def {
            ApertureDefinition::Circle { diameter } => assert!((diameter - 0.001).abs() < 1e-9),
            _ => panic!("expected circle placeholder"),
        }
    }

    #[test]
    fn macro_without_circle_primitive_renders_placeholder_without_panicking() {
        let def = ApertureDefinition::Macro {
            name: "UNSUPPORTED".to_string(),
            primitives: vec![ApertureMacroPrimitive {
                code: ApertureMacroPrimitiveCode::Thermal,
                params: vec!["7".to_string()],
            }],
        };
        let canvas = ApertureRenderer::render(&def, 1000.0, Color::from([0, 0, 0, 255]));
        assert!(canvas.width() > 0 && canvas.height() > 0);
    }
}
