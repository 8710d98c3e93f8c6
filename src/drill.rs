//! Excellon drill interpreter: a line-oriented state machine that reads a
//! tool table and a sequence of positions, emitting `switch_drill_tool`/
//! `drill` events to a [`Sink`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use regex::Captures;

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
enum ValueInterpretation {
    LiteralFloat,
    FixedDecimal { int_digits: u32, frac_digits: u32 },
}

fn patterns() -> &'static [(&'static str, &'static str)] {
    &[
        ("header_begin", r"M48"),
        ("end_of_file", r"M30"),
        (
            "set_unit",
            r"(?P<unit>INCH|METRIC)(,(?P<mode>LZ|\d+\.\d+))?",
        ),
        (
            "file_format",
            r";FILE_FORMAT=(?P<int>\d+):(?P<frac>\d+)",
        ),
        (
            "tooldef",
            r"T(?P<t>\d+)(F\d+)?(S\d+)?C(?P<c>\d+(\.\d+)?)",
        ),
        ("activate_tool", r"T(?P<t>\d+)"),
        (
            "xy",
            r"X(?P<x>-?\d+(\.\d+)?)Y(?P<y>-?\d+(\.\d+)?)",
        ),
        ("x_only", r"X(?P<x>-?\d+(\.\d+)?)"),
        ("y_only", r"Y(?P<y>-?\d+(\.\d+)?)"),
        ("drill_mode", r"G5"),
        ("comment", r";.*"),
        ("end_of_header", r"%"),
        ("not_implemented", r"FMAT.*"),
    ]
}

pub struct DrillInterpreter {
    unit: Option<Unit>,
    value_interpretation: ValueInterpretation,
    tools: HashMap<u32, f64>,
    pos: Vec2,
    path: String,
    line_no: u32,
}

impl Default for DrillInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl DrillInterpreter {
    pub fn new() -> Self {
        Self {
            unit: None,
            value_interpretation: ValueInterpretation::LiteralFloat,
            tools: HashMap::new(),
            pos: Vec2::ZERO,
            path: String::new(),
            line_no: 0,
        }
    }

    pub fn run(&mut self, path: &Path, sink: &mut dyn Sink) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to open drill file {}", path.display()))?;
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

    fn to_inch(&self, value: f64) -> f64 {
        match self.unit {
            Some(Unit::Mm) => value / 25.4,
            _ => value,
        }
    }

    fn convert_coord(&self, text: &str) -> Result<f64, InterpretError> {
        let value = match self.value_interpretation {
            ValueInterpretation::LiteralFloat => text.parse().map_err(|_| {
                InterpretError::MalformedCoordinate {
                    path: self.path.clone(),
                    line: self.line_no,
                    value: text.to_string(),
                }
            })?,
            ValueInterpretation::FixedDecimal {
                int_digits,
                frac_digits,
            } => {
                let (sign, digits) = match text.strip_prefix('-') {
                    Some(rest) => (-1.0, rest),
                    None => (1.0, text),
                };
                let total = (int_digits + frac_digits) as usize;
                if !digits.chars().all(|c| c.is_ascii_digit()) || digits.len() > total {
                    return Err(InterpretError::MalformedCoordinate {
                        path: self.path.clone(),
                        line: self.line_no,
                        value: text.to_string(),
                    });
                }
                let padded = format!("{digits:0<width$}", width = total);
                let (int_part, frac_part) = padded.split_at(int_digits as usize);
                let int_value: f64 = int_part.parse().unwrap_or(0.0);
                let frac_value: f64 = if frac_part.is_empty() {
                    0.0
                } else {
                    frac_part.parse::<f64>().unwrap_or(0.0) / 10f64.powi(frac_digits as i32)
                };
                sign * (int_value + frac_value)
            }
        };
        Ok(self.to_inch(value))
    }
}

struct LineContext<'a, 'b> {
    state: &'a mut DrillInterpreter,
    sink: &'b mut dyn Sink,
}

impl LineHandler for LineContext<'_, '_> {
    fn handle(&mut self, pattern: &str, captures: &Captures) -> Result<(), MatchError> {
        let state = &mut *self.state;
        let sink = &mut *self.sink;
        match pattern {
            "header_begin" | "drill_mode" | "end_of_header" | "comment" => {}
            "end_of_file" => return Err(MatchError::Handler(InterpretError::EndOfFile)),
            "set_unit" => {
                state.unit = Some(match &captures["unit"] {
                    "INCH" => Unit::Inch,
                    _ => Unit::Mm,
                });
                if let Some(mode) = captures.name("mode") {
                    state.value_interpretation = if mode.as_str() == "LZ" {
                        ValueInterpretation::FixedDecimal {
                            int_digits: 2,
                            frac_digits: 4,
                        }
                    } else {
                        let mut parts = mode.as_str().splitn(2, '.');
                        let int_digits: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(2);
                        let frac_digits: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(4);
                        ValueInterpretation::FixedDecimal {
                            int_digits,
                            frac_digits,
                        }
                    };
                }
            }
            "file_format" => {
                let int_digits: u32 = captures["int"].parse().unwrap_or(2);
                let frac_digits: u32 = captures["frac"].parse().unwrap_or(4);
                state.value_interpretation = ValueInterpretation::FixedDecimal {
                    int_digits,
                    frac_digits,
                };
            }
            "tooldef" => {
                let tool: u32 = captures["t"].parse().unwrap_or(0);
                let diameter: f64 = captures["c"].parse().unwrap_or(0.0);
                state.tools.insert(tool, state.to_inch(diameter));
            }
            "activate_tool" => {
                let tool: u32 = captures["t"].parse().unwrap_or(0);
                match state.tools.get(&tool) {
                    Some(diameter) => sink.switch_drill_tool(*diameter),
                    None => warn!(
                        "{}:{}: tool T{tool} requested but never defined, ignoring tool change",
                        state.path, state.line_no
                    ),
                }
            }
            "xy" => {
                let x = state.convert_coord(&captures["x"])?;
                let y = state.convert_coord(&captures["y"])?;
                state.pos = Vec2::new(x, y);
                sink.drill(state.pos);
            }
            "x_only" => {
                let x = state.convert_coord(&captures["x"])?;
                state.pos = Vec2::new(x, state.pos.y);
                sink.drill(state.pos);
            }
            "y_only" => {
                let y = state.convert_coord(&captures["y"])?;
                state.pos = Vec2::new(state.pos.x, y);
                sink.drill(state.pos);
            }
            "not_implemented" => {
                warn!("{}:{}: unsupported drill header line", state.path, state.line_no);
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

    fn run_source(source: &str) -> (DrillInterpreter, ExtentsSink) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{source}").unwrap();
        let mut interp = DrillInterpreter::new();
        let mut sink = ExtentsSink::new();
        interp.run(file.path(), &mut sink).unwrap();
        (interp, sink)
    }

    #[test]
    fn lz_header_defaults_to_two_four_fixed_decimal() {
        let source = "M48\nINCH,LZ\nT01C0.0350\n%\nT01\nX10000Y20000\nM30\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        let center = (min + max) / 2.0;
        assert!((center.x - 1.0).abs() < 1e-9);
        assert!((center.y - 2.0).abs() < 1e-9);
        assert!(((max.x - min.x) - 0.035).abs() < 1e-9);
    }

    #[test]
    fn literal_float_coordinates_are_parsed_directly() {
        let source = "M48\nINCH\nT01C0.020\n%\nT01\nX1.5Y2.25\nM30\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        let center = (min + max) / 2.0;
        assert!((center.x - 1.5).abs() < 1e-9);
        assert!((center.y - 2.25).abs() < 1e-9);
    }

    #[test]
    fn file_format_key_value_sets_fixed_decimal() {
        let source = "M48\nMETRIC\n;FILE_FORMAT=3:3\nT01C1.000\n%\nT01\nX001000Y002000\nM30\n";
        let (_, sink) = run_source(source);
        let min = sink.min_pt().unwrap();
        let max = sink.max_pt().unwrap();
        let center = (min + max) / 2.0;
        // 001.000mm, 002.000mm converted to inches.
        assert!((center.x - 1.0 / 25.4).abs() < 1e-9);
        assert!((center.y - 2.0 / 25.4).abs() < 1e-9);
    }

    #[test]
    fn missing_tool_warns_and_continues_without_panicking() {
        let source = "M48\nINCH,LZ\n%\nT99\nX10000Y20000\nM30\n";
        let (_, sink) = run_source(source);
        assert!(sink.min_pt().is_some());
    }

    #[test]
    fn x_only_inherits_previous_y() {
        let source = "M48\nINCH,LZ\nT01C0.0100\n%\nT01\nX10000Y20000\nX30000\nM30\n";
        let (_, sink) = run_source(source);
        let max = sink.max_pt().unwrap();
        assert!((max.y - (2.0 + 0.005)).abs() < 1e-9);
    }
}
