use anyhow::{Context, Result};
use clap::Parser;
use covprobe::artifact::{select_artifact, Artifact};
use covprobe::cli::Cli;
use covprobe::config::InstrumentConfig;
use covprobe::pipeline::Pipeline;
use tracing_subscriber::EnvFilter;

/// Initialize the stderr subscriber; `--debug` forces TRACE
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => InstrumentConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => InstrumentConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    let path = select_artifact(&args.apk)?;
    let artifact = Artifact::open(&path)
        .with_context(|| format!("Cannot instrument {}", path.display()))?;
    let output_dir = args.out.clone().unwrap_or_else(|| artifact.parent_dir());

    let mut pipeline = Pipeline::from_config(config)?.with_force_extract(args.force_extract);
    if let Some(dir) = &args.content_dir {
        pipeline = pipeline.with_content_dir(dir);
    }

    let outcome = pipeline
        .run(&artifact, &output_dir)
        .with_context(|| format!("Failed to instrument {}", artifact.file_name()))?;

    println!("{}", outcome.apk_path.display());
    match &outcome.manifest_path {
        Some(manifest) => println!("{}", manifest.display()),
        None => eprintln!("warning: manifest was not written"),
    }
    Ok(())
}
