//! Error taxonomy shared by the interpreters and the matcher. Mirrors the
//! three classes in the error-handling design: unrecoverable failures
//! propagate as `InterpretError`, soft-unsupported situations are logged via
//! `log::warn!` and never constructed as errors, and the end-of-file sentinel
//! is represented explicitly so the run loop can catch it without treating it
//! as a failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("{path}:{line}: no coordinate format specification has been seen yet")]
    PrecisionNotSet { path: String, line: u32 },

    #[error("{path}:{line}: arc command is missing required I/J center offset")]
    MissingArcOffset { path: String, line: u32 },

    #[error("{path}:{line}: unsupported command combination (e.g. single-quadrant arc mode)")]
    NotImplemented { path: String, line: u32 },

    #[error("{path}:{line}: malformed coordinate value: {value}")]
    MalformedCoordinate {
        path: String,
        line: u32,
        value: String,
    },

    /// Not a real error: signals that `M02`/`M30` was reached. Caught by the
    /// run loop and never surfaced to callers.
    #[error("end of file sentinel reached")]
    EndOfFile,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no pattern matched line: {0:?}")]
    NoPatternMatched(String),

    #[error("pattern {0:?} matched but the handler does not support it")]
    NoHandler(String),

    #[error(transparent)]
    Handler(#[from] InterpretError),
}

#[derive(Debug, Error)]
pub enum RenderscriptError {
    #[error("render script references unknown step {0:?}")]
    UnknownStep(String),

    #[error("step {0:?} has no color")]
    MissingColor(String),

    #[error("invalid color {0:?}: expected #rrggbb or #rrggbbaa")]
    InvalidColor(String),

    #[error("step {0:?} produced no geometry; cannot use it as a compose source")]
    EmptyLayer(String),

    #[error("composing step {0:?} yielded no layers")]
    EmptyComposition(String),
}
