use std::path::PathBuf;
use std::process::ExitCode;

use slidedeck_common::config::Config;
use slidedeck_extractor::{DeckOutcome, Pipeline};
use tracing::{error, info};

/// Exit status when the video produced no slides.
const EXIT_NO_SLIDES: u8 = 2;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (Some(input), Some(output)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from))
    else {
        eprintln!("usage: slidedeck <video> <output.pdf> [config.toml]");
        return ExitCode::FAILURE;
    };

    let config = match args.next().map(PathBuf::from) {
        Some(path) => match Config::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    let pipeline = match Pipeline::new(config.pipeline) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid pipeline configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(input = %input.display(), output = %output.display(), "converting video");

    match pipeline.run_file(&input) {
        Ok(DeckOutcome::Slides { deck, stats }) => {
            if let Err(e) = std::fs::write(&output, &deck.pdf) {
                error!(error = %e, path = %output.display(), "failed to write slide deck");
                return ExitCode::FAILURE;
            }
            info!(
                slides = deck.keyframes.len(),
                frames = stats.frames_decoded,
                path = %output.display(),
                "slide deck written"
            );
            ExitCode::SUCCESS
        }
        Ok(DeckOutcome::Empty { stats }) => {
            eprintln!(
                "No slides could be extracted from {} ({} frames decoded)",
                input.display(),
                stats.frames_decoded
            );
            ExitCode::from(EXIT_NO_SLIDES)
        }
        Err(e) => {
            error!(error = %e, input = %input.display(), "conversion failed");
            ExitCode::FAILURE
        }
    }
}
