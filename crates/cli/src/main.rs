//! Authenticity Scan CLI
//!
//! Command-line front end for the screening pipeline.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::calibrate::CalibrateCommand;
use commands::models::ModelsCommand;
use commands::scan::ScanCommand;

#[derive(Parser)]
#[command(
    name = "authenticity-scan",
    version,
    about = "Deepfake screening with calibrated scores and saliency heatmaps",
    after_help = "EXAMPLES:\n  \
                  # Score one image with a single model\n  \
                  authenticity-scan scan face.jpg --model models/xception_advanced.onnx\n\n  \
                  # Use a YAML ensemble and write heatmaps next to the results\n  \
                  authenticity-scan scan face.jpg --config screening.yaml --output-dir ./heatmaps\n\n  \
                  # Heatmap for a score computed elsewhere\n  \
                  authenticity-scan scan face.jpg --config screening.yaml --fake-score 87.5 --method layercam\n\n  \
                  # Fit the calibration temperature on labeled validation predictions\n  \
                  authenticity-scan calibrate validation.json\n\n  \
                  # Show which configured members load\n  \
                  authenticity-scan models --config screening.yaml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an image and optionally render its heatmap
    Scan(ScanCommand),

    /// Fit a calibration temperature from labeled predictions
    Calibrate(CalibrateCommand),

    /// List configured ensemble members and their load status
    Models(ModelsCommand),
}

fn main() -> Result<()> {
    // Bound the global pool (saliency methods run on it)
    if let Ok(threads_str) = std::env::var("AUTHENTICITY_THREADS") {
        if let Ok(num_threads) = threads_str.parse::<usize>() {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .ok();
        }
    }

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Scan(cmd) => cmd.execute(),
        Commands::Calibrate(cmd) => cmd.execute(),
        Commands::Models(cmd) => cmd.execute(),
    }
}
