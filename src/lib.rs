pub mod aperture;
pub mod canvas;
pub mod drill;
pub mod error;
pub mod geometry;
pub mod gerber;
pub mod matcher;
pub mod pipeline;
pub mod renderscript;
pub mod sampler;
pub mod sink;
