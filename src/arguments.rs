use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// Render Gerber/Excellon PCB fabrication files to PNG images.
pub struct Arguments {
    #[argh(subcommand)]
    pub command: CommandEnum,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum CommandEnum {
    Render(RenderCommand),
}

#[derive(FromArgs, PartialEq, Debug)]
/// Run a render script and write its deliverable steps as PNG files.
#[argh(subcommand, name = "render")]
pub struct RenderCommand {
    #[argh(option)]
    /// path to the render script JSON document.
    pub script: PathBuf,

    #[argh(option, default = "PathBuf::from(\".\")")]
    /// directory PNG deliverables are written into.
    pub output_directory: PathBuf,

    #[argh(option, default = "600.0")]
    /// rendering resolution in dots per inch.
    pub dpi: f64,

    #[argh(switch, short = 'v')]
    /// enable debug-level logging (default is info).
    pub verbose: bool,
}
