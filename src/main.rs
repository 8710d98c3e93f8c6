use anyhow::{Context, Result};
use log::LevelFilter;

use gerber_renderer::renderscript::RenderScript;

mod arguments;

fn main() {
    let arguments: arguments::Arguments = argh::from_env();
    let level = match &arguments.command {
        arguments::CommandEnum::Render(render) if render.verbose => LevelFilter::Debug,
        _ => LevelFilter::Info,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .expect("Failed to initialize logger.");

    if let Err(error) = trampoline(arguments) {
        log::error!("Fatal error: {:?}", error);
        std::process::exit(1);
    }
}

fn trampoline(arguments: arguments::Arguments) -> Result<()> {
    match arguments.command {
        arguments::CommandEnum::Render(render) => render_script(render),
    }
}

fn render_script(command: arguments::RenderCommand) -> Result<()> {
    log::info!("Loading render script: {:?}", command.script);
    let script = RenderScript::load(&command.script).context("failed to load render script")?;
    let base_dir = command
        .script
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    std::fs::create_dir_all(&command.output_directory)
        .context("failed to create output directory")?;

    let deliverables: Vec<String> = script.deliverables().map(|s| s.to_string()).collect();
    let mut renderer = gerber_renderer::renderscript::Renderer::new(&script, command.dpi, base_dir);

    for name in &deliverables {
        log::info!("Rendering step: {name}");
        let canvas = renderer
            .render(name)
            .with_context(|| format!("failed to render step {name:?}"))?;
        let output_path = command.output_directory.join(format!("{name}.png"));
        canvas
            .export_png(&output_path)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        log::info!("Wrote {}", output_path.display());
    }

    Ok(())
}
