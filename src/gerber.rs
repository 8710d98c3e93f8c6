//! RS-274X (Gerber) interpreter: a line-oriented state machine that
//! reconstructs a drawing machine from text and emits [`Sink`] events.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use regex::Captures;

use crate::aperture::{
    ApertureDefinition, ApertureMacro, ApertureMacroPrimitive, ApertureMacroPrimitiveCode,
};
use crate::error::{InterpretError, MatchError};
use crate::geometry::Vec2;
use crate::matcher::{LineHandler, MultiMatcher};
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Inch,
    Mm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interpolation {
    Linear,
    Cw,
    Ccw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuadrantMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy)]
struct Precision {
    x_int: u32,
    x_frac: u32,
    y_int: u32,
    y_frac: u32,
}

/// Pending X/Y/I/J parameters accumulated while scanning a composite `cmd`
/// body, cleared every time a `D` token finalizes a block.
#[derive(Debug, Default, Clone)]
struct PendingCoords {
    x: Option<String>,
    y: Option<String>,
    i: Option<String>,
    j: Option<String>,
}

fn patterns() -> &'static [(&'static str, &'static str)] {
    &[
        ("set_unit", r"%MO(?P<unit>IN|MM)\*%"),
        (
            "set_precision",
            r"%FSLAX(?P<xi>\d)(?P<xd>\d)Y(?P<yi>\d)(?P<yd>\d)\*%",
        ),
        (
            "add_aperture",
            r"%ADD(?P<code>\d{2,})(?P<template>[A-Za-z][A-Za-z0-9_.]*),(?P<params>[^*]*)\*%",
        ),
        (
            "assign_aperture_macro",
            r"%ADD(?P<code>\d{2,})(?P<name>[A-Za-z][A-Za-z0-9_]*)\*%",
        ),
        ("aperture_macro_start", r"%AM(?P<name>[A-Za-z0-9_]+)\*"),
        ("aperture_macro_definition", r"(?P<params>[-.,0-9]+)\*"),
        ("aperture_macro_end", r"%"),
        ("load_polarity", r"%LP(?P<polarity>[CD])\*%"),
        ("img_polarity", r"%IP(?P<polarity>POS|NEG)\*%"),
        ("offset", r"%OFA(?P<a>-?[0-9.]+)B(?P<b>-?[0-9.]+)\*%"),
        ("cmd", r"(?P<body>[-GDXYIJ0-9]+)\*"),
        ("key_value", r"G04 ?(?P<key>\w+)=(?P<value>\w+)\*"),
        ("comment", r"G04 ?(?P<comment>.*)\*"),
        ("m", r"M(?P<code>\d+)\*"),
        ("not_implemented", r"%.*"),
    ]
}

pub struct GerberInterpreter {
    unit: Option<Unit>,
    precision: Option<Precision>,
    interpolation: Interpolation,
    quadrant_mode: QuadrantMode,
    region_active: bool,
    pos: Option<Vec2>,
    apertures: HashMap<u32, ApertureDefinition>,
    macros: HashMap<String, ApertureMacro>,
    current_macro: Option<(String, ApertureMacro)>,
    properties: HashMap<String, String>,
    path: String,
    line_no: u32,
}

impl Default for GerberInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl GerberInterpreter {
    pub fn new() -> Self {
        Self {
            unit: None,
            precision: None,
            interpolation: Interpolation::Linear,
            quadrant_mode: QuadrantMode::Multi,
            region_active: false,
            pos: None,
            apertures: HashMap::new(),
            macros: HashMap::new(),
            current_macro: None,
            properties: HashMap::new(),
            path: String::new(),
            line_no: 0,
        }
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn run(&mut self, path: &Path, sink: &mut dyn Sink) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to open gerber file {}", path.display()))?;
        self.path = path.display().to_string();
        self.line_no = 0;

        let matcher = MultiMatcher::new(patterns());
        for raw_line in text.lines() {
            self.line_no += 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            let mut ctx = LineContext { state: self, sink };
            match matcher.fullmatch(line, &mut ctx) {
                Ok(()) => {}
                Err(MatchError::Handler(InterpretError::EndOfFile)) => break,
                Err(MatchError::Handler(err)) => return Err(err.into()),
                Err(MatchError::NoPatternMatched(line)) => {
                    warn!("{}:{}: unrecognized line: {line:?}", self.path, self.line_no);
                }
                Err(MatchError::NoHandler(pattern)) => {
                    warn!("{}:{}: no handler for pattern {pattern:?}", self.path, self.line_no);
                }
            }
        }
        Ok(())
    }

    fn convert_coordinate(&self, digits: &str, int_digits: u32, frac_digits: u32) -> Result<f64, InterpretError> {
        let (sign, digits) = match digits.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, digits),
        };
        let total = (int_digits + frac_digits) as usize;
        if digits.len() > total || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(InterpretError::MalformedCoordinate {
                path: self.path.clone(),
                line: self.line_no,
                value: digits.to_string(),
            });
        }
        let padded = format!("{:0>width$}", digits, width = total);
        let (int_part, frac_part) = padded.split_at(int_digits as usize);
        let int_value: f64 = int_part.parse().unwrap_or(0.0);
        let frac_value: f64 = if frac_part.is_empty() {
            0.0
        } else {
            frac_part.parse::<f64>().unwrap_or(0.0) / 10f64.powi(frac_digits as i32)
        };
        let value = sign * (int_value + frac_value);
        Ok(match self.unit {
            Some(Unit::Mm) => value / 25.4,
            _ => value,
        })
    }

    fn execute_g(&mut self, n: u32, sink: &mut dyn Sink) {
        match n {
            1 => self.interpolation = Interpolation::Linear,
            2 => self.interpolation = Interpolation::Cw,
            3 => self.interpolation = Interpolation::Ccw,
            36 => {
                self.region_active = true;
                sink.begin_path();
            }
            37 => {
                self.region_active = false;
                sink.end_path();
            }
            70 => self.unit = Some(Unit::Inch),
            71 => self.unit = Some(Unit::Mm),
            74 => self.quadrant_mode = QuadrantMode::Single,
            75 => self.quadrant_mode = QuadrantMode::Multi,
            other => warn!("{}:{}: unsupported G code G{other}", self.path, self.line_no),
        }
    }

    fn select_aperture(&mut self, code: u32, sink: &mut dyn Sink) {
        let def = self.apertures.get(&code).cloned().unwrap_or_else(|| {
            warn!(
                "{}:{}: aperture D{code} is undefined, substituting placeholder",
                self.path, self.line_no
            );
            ApertureDefinition::missing_placeholder()
        });
        sink.select_aperture(&def);
    }

    fn resolve_pending(
        &self,
        pending: &PendingCoords,
    ) -> Result<(Option<Vec2>, f64, f64), InterpretError> {
        let precision = self.precision.ok_or_else(|| InterpretError::PrecisionNotSet {
            path: self.path.clone(),
            line: self.line_no,
        })?;

        let new_xy = if pending.x.is_some() || pending.y.is_some() {
            let x = match &pending.x {
                Some(digits) => self.convert_coordinate(digits, precision.x_int, precision.x_frac)?,
                None => self.pos.map(|p| p.x).unwrap_or(0.0),
            };
            let y = match &pending.y {
                Some(digits) => self.convert_coordinate(digits, precision.y_int, precision.y_frac)?,
                None => self.pos.map(|p| p.y).unwrap_or(0.0),
            };
            Some(Vec2::new(x, y))
        } else {
            None
        };

        let i = match &pending.i {
            Some(digits) => self.convert_coordinate(digits, precision.x_int, precision.x_frac)?,
            None => 0.0,
        };
        let j = match &pending.j {
            Some(digits) => self.convert_coordinate(digits, precision.y_int, precision.y_frac)?,
            None => 0.0,
        };

        Ok((new_xy, i, j))
    }

    fn execute_d(
        &mut self,
        d: u32,
        pending: &PendingCoords,
        sink: &mut dyn Sink,
    ) -> Result<(), InterpretError> {
        if d >= 10 {
            self.select_aperture(d, sink);
            return Ok(());
        }

        let (new_xy, i, j) = self.resolve_pending(pending)?;
        let pos = self.pos.unwrap_or(Vec2::ZERO);

        match self.interpolation {
            Interpolation::Linear => {
                let target = new_xy.unwrap_or(pos);
                match d {
                    1 => {
                        if self.region_active {
                            sink.region_line(target);
                        } else {
                            sink.line(pos, target);
                        }
                    }
                    2 => {
                        if self.region_active {
                            sink.region_move(target);
                        } else if new_xy.is_none() {
                            sink.close_contour();
                        }
                    }
                    3 => sink.flash_at(target),
                    _ => unreachable!("only D01/D02/D03 finalize a block"),
                }
                self.pos = Some(target);
            }
            Interpolation::Cw | Interpolation::Ccw if self.quadrant_mode == QuadrantMode::Multi => {
                let target = new_xy.ok_or_else(|| InterpretError::MissingArcOffset {
                    path: self.path.clone(),
                    line: self.line_no,
                })?;
                let center = pos + Vec2::new(i, j);
                if d != 1 {
                    return Err(InterpretError::NotImplemented {
                        path: self.path.clone(),
                        line: self.line_no,
                    });
                }
                if pos.approx_eq(&target) {
                    sink.circle(center, (center - pos).length());
                } else if self.interpolation == Interpolation::Cw {
                    sink.arc_cw(pos, target, center);
                } else {
                    sink.arc_ccw(pos, target, center);
                }
                self.pos = Some(target);
            }
            _ => {
                return Err(InterpretError::NotImplemented {
                    path: self.path.clone(),
                    line: self.line_no,
                })
            }
        }
        Ok(())
    }

    /// Splits a composite `cmd` body into `<letter><value>` tokens, feeding
    /// `G`/`D` tokens through immediate execution and accumulating
    /// `X`/`Y`/`I`/`J` tokens as pending coordinates for the next `D` token.
    fn execute_cmd(&mut self, body: &str, sink: &mut dyn Sink) -> Result<(), InterpretError> {
        let mut pending = PendingCoords::default();
        let indices: Vec<(usize, char)> = body.char_indices().collect();

        let mut i = 0;
        while i < indices.len() {
            let (_, letter) = indices[i];
            if !letter.is_ascii_alphabetic() {
                i += 1;
                continue;
            }
            let value_start = indices[i].0 + letter.len_utf8();
            let mut j = i + 1;
            while j < indices.len() && !indices[j].1.is_ascii_alphabetic() {
                j += 1;
            }
            let value_end = if j < indices.len() { indices[j].0 } else { body.len() };
            let value = &body[value_start..value_end];

            match letter {
                'G' => self.execute_g(value.parse().unwrap_or(0), sink),
                'D' => {
                    self.execute_d(value.parse().unwrap_or(0), &pending, sink)?;
                    pending = PendingCoords::default();
                }
                'X' => pending.x = Some(value.to_string()),
                'Y' => pending.y = Some(value.to_string()),
                'I' => pending.i = Some(value.to_string()),
                'J' => pending.j = Some(value.to_string()),
                _ => {}
            }
            i = j;
        }
        Ok(())
    }
}

/// Binds the persistent interpreter state to a sink for the duration of a
/// single `fullmatch` call, since the Sink is not itself part of the
/// interpreter's state.
struct LineContext<'a, 'b> {
    state: &'a mut GerberInterpreter,
    sink: &'b mut dyn Sink,
}

impl LineHandler for LineContext<'_, '_> {
    fn handle(&mut self, pattern: &str, captures: &Captures) -> Result<(), MatchError> {
        let state = &mut *self.state;
        let sink = &mut *self.sink;
        match pattern {
            "set_unit" => {
                state.unit = Some(match &captures["unit"] {
                    "IN" => Unit::Inch,
                    _ => Unit::Mm,
                });
            }
            "set_precision" => {
                state.precision = Some(Precision {
                    x_int: captures["xi"].parse().unwrap_or(2),
                    x_frac: captures["xd"].parse().unwrap_or(4),
                    y_int: captures["yi"].parse().unwrap_or(2),
                    y_frac: captures["yd"].parse().unwrap_or(4),
                });
            }
            "add_aperture" => {
                let code: u32 = captures["code"].parse().unwrap_or(0);
                let template = &captures["template"];
                let to_inches = match state.unit {
                    Some(Unit::Mm) => 1.0 / 25.4,
                    _ => 1.0,
                };
                let params: Vec<f64> = captures["params"]
                    .split('X')
                    .filter_map(|p| p.parse::<f64>().ok())
                    .map(|p| p * to_inches)
                    .collect();
                let def = match template {
                    "C" => ApertureDefinition::Circle {
                        diameter: params.first().copied().unwrap_or(0.0),
                    },
                    "R" => ApertureDefinition::Rectangle {
                        width: params.first().copied().unwrap_or(0.0),
                        height: params.get(1).copied().unwrap_or(0.0),
                    },
                    "O" => ApertureDefinition::Obround {
                        width: params.first().copied().unwrap_or(0.0),
                        height: params.get(1).copied().unwrap_or(0.0),
                    },
                    other => {
                        if let Some(primitives) = state.macros.get(other) {
                            ApertureDefinition::Macro {
                                name: other.to_string(),
                                primitives: primitives.clone(),
                            }
                        } else {
                            warn!(
                                "{}:{}: unknown aperture template {other:?}",
                                state.path, state.line_no
                            );
                            ApertureDefinition::missing_placeholder()
                        }
                    }
                };
                state.apertures.insert(code, def);
            }
            "assign_aperture_macro" => {
                let code: u32 = captures["code"].parse().unwrap_or(0);
                let name = &captures["name"];
                let def = match state.macros.get(name) {
                    Some(primitives) => ApertureDefinition::Macro {
                        name: name.to_string(),
                        primitives: primitives.clone(),
                    },
                    None => {
                        warn!("{}:{}: macro {name:?} is undefined", state.path, state.line_no);
                        ApertureDefinition::missing_placeholder()
                    }
                };
                state.apertures.insert(code, def);
            }
            "aperture_macro_start" => {
                state.current_macro = Some((captures["name"].to_string(), Vec::new()));
            }
            "aperture_macro_definition" => {
                if let Some((_, primitives)) = state.current_macro.as_mut() {
                    let fields: Vec<&str> = captures["params"].split(',').collect();
                    if let Some(code) = fields.first().and_then(|s| s.parse::<i64>().ok()) {
                        if let Some(code) = ApertureMacroPrimitiveCode::from_code(code) {
                            primitives.push(ApertureMacroPrimitive {
                                code,
                                params: fields[1..].iter().map(|s| s.to_string()).collect(),
                            });
                        } else {
                            warn!(
                                "{}:{}: unsupported macro primitive code {code}",
                                state.path, state.line_no
                            );
                        }
                    }
                } else {
                    warn!(
                        "{}:{}: numeric line outside any aperture macro definition",
                        state.path, state.line_no
                    );
                }
            }
            "aperture_macro_end" => {
                if let Some((name, primitives)) = state.current_macro.take() {
                    state.macros.insert(name, primitives);
                }
            }
            "load_polarity" => match &captures["polarity"] {
                "D" => sink.drawmode_dark(),
                _ => sink.drawmode_clear(),
            },
            "img_polarity" => {
                if &captures["polarity"] == "NEG" {
                    warn!("{}:{}: negative image polarity is not supported", state.path, state.line_no);
                }
            }
            "offset" => {
                let a: f64 = captures["a"].parse().unwrap_or(0.0);
                let b: f64 = captures["b"].parse().unwrap_or(0.0);
                if a != 0.0 || b != 0.0 {
                    warn!("{}:{}: nonzero image offset is not supported", state.path, state.line_no);
                }
            }
            "cmd" => {
                state.execute_cmd(&captures["body"], sink)?;
            }
            "key_value" => {
                state
                    .properties
                    .insert(captures["key"].to_string(), captures["value"].to_string());
            }
            "comment" => {}
            "m" => {
                let code: u32 = captures["code"].parse().unwrap_or(0);
                if code == 2 || code == 30 {
                    return Err(MatchError::Handler(InterpretError::EndOfFile));
                }
            }
            "not_implemented" => {
                warn!("{}:{}: unsupported extended command", state.path, state.line_no);
            }
            other => return Err(MatchError::NoHandler(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ExtentsSink;
    use std::io::Write;

    fn run_source(source: &str) -> (GerberInterpreter, ExtentsSink) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{source}").unwrap();
        let mut interp = GerberInterpreter::new();
        let mut sink = ExtentsSink::new();
        interp.run(file.path(), &mut sink).unwrap();
        (interp, sink)
    }

    // Under %FSLAX23Y23*% (x_int=2, x_frac=3), digits "1000" left-pad to
    // "01000", split 2/3 into int "01"=1 and frac "000"=0, giving 1.0 -- not
    // 0.010. Flash center is (1.0, 1.0); aperture radius is 0.025.
    #[test]
    fn minimal_flash_produces_expected_extents() {
        let source = "%FSLAX23Y23*%\n%MOIN*%\n%ADD10C,0.050*%\nD10*\nX1000Y1000D03*\nM02*\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        assert!((min.x - 0.975).abs() < 1e-9);
        assert!((min.y - 0.975).abs() < 1e-9);
        assert!((max.x - 1.025).abs() < 1e-9);
        assert!((max.y - 1.025).abs() < 1e-9);
        assert!(((max - min).x - 0.050).abs() < 1e-6);
        assert!(((max - min).y - 0.050).abs() < 1e-6);
    }

    // G01 line from (0,0) to (1.0,0.0) (X1000 -> 1.0 by the same precision
    // rule as above) with a 0.050-diameter round aperture, extents padded by
    // its 0.025 radius at both endpoints.
    #[test]
    fn linear_trace_produces_round_cap_extents() {
        let source = "%FSLAX23Y23*%\n%MOIN*%\n%ADD10C,0.050*%\nD10*\nG01*\nX0Y0D02*\nX1000Y0D01*\nM02*\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        assert!((min.x - (-0.025)).abs() < 1e-9);
        assert!((min.y - (-0.025)).abs() < 1e-9);
        assert!((max.x - 1.025).abs() < 1e-9);
        assert!((max.y - 0.025).abs() < 1e-9);
    }

    // G03 (CCW) with I1000J0 -> center offset (1.0, 0.0) from the current
    // position (0,0); X0Y0 on the same command repeats the start point, so
    // start == target and the block resolves to a full circle of radius 1.0
    // centered at (1.0, 0.0). A 0.050-diameter round aperture pads the
    // extents by its 0.025 radius.
    #[test]
    fn full_circle_via_ccw_arc_produces_expected_extents() {
        let source =
            "%FSLAX23Y23*%\n%MOIN*%\n%ADD10C,0.050*%\nD10*\nG75*\nG03*\nX0Y0I1000J0D01*\nM02*\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        assert!((min.x - (-0.025)).abs() < 1e-9);
        assert!((min.y - (-1.025)).abs() < 1e-9);
        assert!((max.x - 2.025).abs() < 1e-9);
        assert!((max.y - 1.025).abs() < 1e-9);
    }

    // G36/G37 region bounded by (0,0)-(1,0)-(1,1)-(0,1): a unit square.
    // Region extents are unpadded (pad is forced to zero while walking a
    // region contour), so min/max land exactly on the four corners.
    #[test]
    fn region_fill_square_produces_unpadded_extents() {
        let source = "%FSLAX23Y23*%\n%MOIN*%\nG36*\nX0Y0D02*\nX1000Y0D01*\nX1000Y1000D01*\nX0Y1000D01*\nG37*\nM02*\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        assert!((min.x - 0.0).abs() < 1e-9);
        assert!((min.y - 0.0).abs() < 1e-9);
        assert!((max.x - 1.0).abs() < 1e-9);
        assert!((max.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mm_unit_converts_aperture_to_one_inch_diameter() {
        let source = "%MOMM*%\n%ADD10C,25.4*%\n%FSLAX23Y23*%\nD10*\nX0Y0D03*\nM02*\n";
        let (interp, _sink) = run_source(source);
        match interp.apertures.get(&10).unwrap() {
            ApertureDefinition::Circle { diameter } => assert!((diameter - 1.0).abs() < 1e-9),
            _ => panic!("expected circle"),
        }
    }

    #[test]
    fn missing_aperture_substitutes_placeholder_and_continues() {
        let source = "%FSLAX23Y23*%\n%MOIN*%\nD99*\nX0Y0D03*\nM02*\n";
        let (_, sink) = run_source(source);
        assert!(sink.min_pt().is_some());
    }
}
