mod config;
mod logging;
mod run;

use clap::Parser;
use config::RunConfig;
use facetrace_core::config::{DEFAULT_MAX_AREA, DEFAULT_MIN_AREA};
use facetrace_core::{RunError, SizeBounds};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "facetrace",
    version,
    about = "Find faces in an image corpus and match them against known individuals"
)]
struct Cli {
    /// Path to the run configuration (JSON, or TOML with a .toml extension)
    #[arg(long)]
    params: PathBuf,

    /// Minimum working image area in pixels
    #[arg(long, default_value_t = DEFAULT_MIN_AREA as i64, allow_negative_numbers = true)]
    min: i64,

    /// Maximum working image area in pixels, not below --min
    #[arg(long, default_value_t = DEFAULT_MAX_AREA as i64, allow_negative_numbers = true)]
    max: i64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.exit_code(), "{e}");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn execute(cli: &Cli) -> Result<(), RunError> {
    // Bounds are checked before the configuration or any image is touched.
    let bounds = SizeBounds::new(cli.min, cli.max).map_err(RunError::InvalidBounds)?;
    let config = RunConfig::load(&cli.params)?;

    let _guard = logging::init(&config.workspace).map_err(|e| RunError::Other(format!("{e:#}")))?;
    tracing::info!(params = %cli.params.display(), "facetrace starting");

    let summary = run::run(&config, bounds)?;
    tracing::info!(
        images = summary.target_images,
        faces = summary.target_faces,
        known_faces = summary.known_faces,
        matches = summary.matches,
        "run complete"
    );
    println!(
        "{} faces in {} images, {} matches",
        summary.target_faces, summary.target_images, summary.matches
    );
    Ok(())
}
