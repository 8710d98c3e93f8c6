//! Two-pass rendering driver: size a canvas from a discovery pass, then
//! rasterize for real against that canvas.

use std::path::Path;

use anyhow::Result;

use crate::canvas::{BlendOperator, Canvas, Color};
use crate::sink::{ExtentsSink, RasterSink, Sink};

/// One interpreter's `run` method, abstracted so [`render_layer`] can drive
/// either `GerberInterpreter` or `DrillInterpreter` identically.
pub trait Layer {
    fn run(&mut self, path: &Path, sink: &mut dyn Sink) -> Result<()>;
}

impl Layer for crate::gerber::GerberInterpreter {
    fn run(&mut self, path: &Path, sink: &mut dyn Sink) -> Result<()> {
        crate::gerber::GerberInterpreter::run(self, path, sink)
    }
}

impl Layer for crate::drill::DrillInterpreter {
    fn run(&mut self, path: &Path, sink: &mut dyn Sink) -> Result<()> {
        crate::drill::DrillInterpreter::run(self, path, sink)
    }
}

/// Renders one layer: discover its extents with an [`ExtentsSink`] pass,
/// allocate a canvas sized to those extents, then rasterize for real.
/// Returns `None` if the layer produced no drawable geometry.
pub fn render_layer<L: Layer>(
    interpreter: &mut L,
    path: &Path,
    dpi: f64,
    color: Color,
    background: Option<Color>,
    alpha_polarize_threshold: Option<u8>,
) -> Result<Option<Canvas>> {
    let mut extents = ExtentsSink::new();
    interpreter.run(path, &mut extents)?;

    let (min, max) = match (extents.min_pt(), extents.max_pt()) {
        (Some(min), Some(max)) => (min, max),
        _ => return Ok(None),
    };

    let mut canvas = Canvas::create_inches(max - min, dpi, min, false);
    if let Some(background) = background {
        canvas.fill(background);
    }

    let mut raster = RasterSink::new(&mut canvas, color);
    interpreter.run(path, &mut raster)?;

    if let Some(threshold) = alpha_polarize_threshold {
        canvas.alpha_polarize(threshold);
    }

    Ok(Some(canvas))
}

/// Composes `layers` (in order, bottom to top) onto a single canvas covering
/// their union extents, filled with `background` first.
pub fn compose(layers: &[(&Canvas, BlendOperator)], background: Color) -> Option<Canvas> {
    if layers.is_empty() {
        return None;
    }
    let refs: Vec<&Canvas> = layers.iter().map(|(c, _)| *c).collect();
    let mut composition = Canvas::create_composition(&refs, false);
    composition.fill(background);
    for (layer, operator) in layers {
        layer.compose_onto(&mut composition, *operator);
    }
    Some(composition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gerber::GerberInterpreter;
    use std::io::Write;

    fn write_source(source: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{source}").unwrap();
        file
    }

    #[test]
    fn empty_layer_produces_no_canvas() {
        let file = write_source("%FSLAX23Y23*%\n%MOIN*%\nM02*\n");
        let mut interp = GerberInterpreter::new();
        let result = render_layer(
            &mut interp,
            file.path(),
            1000.0,
            Color::from([0, 0, 0, 255]),
            None,
            None,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn flash_produces_a_sized_canvas() {
        let file = write_source("%FSLAX23Y23*%\n%MOIN*%\n%ADD10C,0.050*%\nD10*\nX1000Y1000D03*\nM02*\n");
        let mut interp = GerberInterpreter::new();
        let canvas = render_layer(
            &mut interp,
            file.path(),
            1000.0,
            Color::from([0, 0, 0, 255]),
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert!(canvas.width() > 0 && canvas.height() > 0);
    }

    #[test]
    fn composing_no_layers_returns_none() {
        assert!(compose(&[], Color::from([255, 255, 255, 255])).is_none());
    }
}
