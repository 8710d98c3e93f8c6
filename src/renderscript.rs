//! JSON-configured orchestration layer: named render/compose steps, `$name`
//! substitution against a definitions table, and memoized recursive
//! resolution of compose sources. This is the ambient driver sitting above
//! the core interpreter/sink/canvas contract (not part of it).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use serde::Deserialize;

use crate::canvas::{BlendOperator, Canvas, Color};
use crate::drill::DrillInterpreter;
use crate::error::RenderscriptError;
use crate::gerber::GerberInterpreter;
use crate::pipeline::{compose, render_layer};

#[derive(Debug, Deserialize)]
pub struct RenderScript {
    #[serde(default)]
    pub definitions: HashMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub deliverable: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    RenderGerber {
        input: String,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        background: Option<String>,
        #[serde(default)]
        alpha_polarize_threshold: Option<u8>,
    },
    RenderDrill {
        input: String,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        background: Option<String>,
        #[serde(default)]
        alpha_polarize_threshold: Option<u8>,
    },
    Compose {
        sources: Vec<ComposeSource>,
        background: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ComposeSource {
    pub step: String,
    #[serde(default)]
    pub operator: BlendOperator,
}

impl RenderScript {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to open render script {}", path.display()))?;
        let script: RenderScript = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse render script {}", path.display()))?;
        Ok(script)
    }

    fn find(&self, name: &str) -> Result<&Step, RenderscriptError> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .ok_or_else(|| RenderscriptError::UnknownStep(name.to_string()))
    }

    pub fn deliverables(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|step| step.deliverable)
            .map(|step| step.name.as_str())
    }
}

fn substitute(text: &str, definitions: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\$(\w+)").unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        definitions.get(name).cloned().unwrap_or_else(|| {
            warn!("render script: undefined substitution ${name}");
            caps[0].to_string()
        })
    })
    .into_owned()
}

fn parse_color(text: &str) -> Result<Color, RenderscriptError> {
    let hex = text
        .strip_prefix('#')
        .ok_or_else(|| RenderscriptError::InvalidColor(text.to_string()))?;
    let bytes = match hex.len() {
        6 | 8 => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| RenderscriptError::InvalidColor(text.to_string()))?,
        _ => return Err(RenderscriptError::InvalidColor(text.to_string())),
    };
    Ok(Color::from([
        bytes[0],
        bytes[1],
        bytes[2],
        *bytes.get(3).unwrap_or(&255),
    ]))
}

/// Drives a single [`RenderScript`] at a fixed DPI, caching each named
/// step's rendered canvas so a step referenced by multiple `compose` steps
/// is only rasterized once.
pub struct Renderer<'a> {
    script: &'a RenderScript,
    dpi: f64,
    base_dir: PathBuf,
    cache: HashMap<String, Canvas>,
}

impl<'a> Renderer<'a> {
    pub fn new(script: &'a RenderScript, dpi: f64, base_dir: PathBuf) -> Self {
        Self {
            script,
            dpi,
            base_dir,
            cache: HashMap::new(),
        }
    }

    /// Resolves `name` to a rendered canvas, recursively rendering and
    /// caching any compose sources it depends on first.
    pub fn render(&mut self, name: &str) -> Result<&Canvas> {
        if !self.cache.contains_key(name) {
            let canvas = self.render_uncached(name)?;
            self.cache.insert(name.to_string(), canvas);
        }
        Ok(self.cache.get(name).expect("just inserted"))
    }

    fn render_uncached(&mut self, name: &str) -> Result<Canvas> {
        let step = self.script.find(name)?;
        match &step.kind {
            StepKind::RenderGerber {
                input,
                color,
                background,
                alpha_polarize_threshold,
            } => {
                let input = substitute(input, &self.script.definitions);
                let color = color
                    .as_ref()
                    .ok_or_else(|| RenderscriptError::MissingColor(name.to_string()))?;
                let color = parse_color(&substitute(color, &self.script.definitions))?;
                let background = background
                    .as_ref()
                    .map(|b| parse_color(&substitute(b, &self.script.definitions)))
                    .transpose()?;
                let mut interpreter = GerberInterpreter::new();
                render_layer(
                    &mut interpreter,
                    &self.base_dir.join(input),
                    self.dpi,
                    color,
                    background,
                    *alpha_polarize_threshold,
                )?
                .ok_or_else(|| RenderscriptError::EmptyLayer(name.to_string()).into())
            }
            StepKind::RenderDrill {
                input,
                color,
                background,
                alpha_polarize_threshold,
            } => {
                let input = substitute(input, &self.script.definitions);
                let color = color
                    .as_ref()
                    .ok_or_else(|| RenderscriptError::MissingColor(name.to_string()))?;
                let color = parse_color(&substitute(color, &self.script.definitions))?;
                let background = background
                    .as_ref()
                    .map(|b| parse_color(&substitute(b, &self.script.definitions)))
                    .transpose()?;
                let mut interpreter = DrillInterpreter::new();
                render_layer(
                    &mut interpreter,
                    &self.base_dir.join(input),
                    self.dpi,
                    color,
                    background,
                    *alpha_polarize_threshold,
                )?
                .ok_or_else(|| RenderscriptError::EmptyLayer(name.to_string()).into())
            }
            StepKind::Compose { sources, background } => {
                for source in sources {
                    self.render(&source.step)?;
                }
                let background = parse_color(&substitute(background, &self.script.definitions))?;
                let layers: Vec<(&Canvas, BlendOperator)> = sources
                    .iter()
                    .map(|source| (self.cache.get(&source.step).expect("rendered above"), source.operator))
                    .collect();
                compose(&layers, background)
                    .ok_or_else(|| RenderscriptError::EmptyComposition(name.to_string()).into())
            }
        }
    }
}
