//! card-ocr - Zone OCR for fixed-layout card images
//!
//! Crops named zones out of a card photo, filters each one for the recognizer and reads it
//! with Tesseract. An auto-tuner searches the filter settings for the whole image.

mod app;
mod capture;
mod config;
mod error;
mod shared;
mod storage;
mod vision;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::OutputOptions;
use crate::config::AppConfig;

/// card-ocr - Zone OCR for card images
#[derive(Parser, Debug)]
#[command(name = "card-ocr")]
#[command(about = "Read text zones from fixed-layout card images")]
struct Args {
    /// Configuration file (defaults to config.toml in the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize the whole image in one call
    Recognize {
        image: PathBuf,
        /// Write the prepared image to this directory
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Recognize every zone of the configured template
    Zones {
        image: PathBuf,
        /// Write each prepared zone image to this directory
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Search contrast, offset and threshold settings for the whole image
    Autotune {
        image: PathBuf,
        /// Write the best trial's image to this directory
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("recognition error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so --json output stays clean
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };

    if let Command::InitConfig { force } = args.command {
        return app::run_init_config(&config_path, force);
    }

    let config = load_or_default_config(&config_path, args.config.is_some())?;
    config.validate()?;

    match args.command {
        Command::Recognize { image, dump_dir } => {
            app::run_recognize(&config, &image, &output(args.json, dump_dir)).await
        }
        Command::Zones { image, dump_dir } => {
            app::run_zones(&config, &image, &output(args.json, dump_dir)).await
        }
        Command::Autotune { image, dump_dir } => {
            app::run_autotune(&config, &image, &output(args.json, dump_dir)).await
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

fn output(json: bool, dump_dir: Option<PathBuf>) -> OutputOptions {
    OutputOptions { json, dump_dir }
}

/// Load configuration from file or fall back to defaults
///
/// A file named with `--config` must exist; the default location may be missing.
fn load_or_default_config(path: &std::path::Path, explicit: bool) -> Result<AppConfig> {
    if path.exists() {
        let config = config::load_config(path)
            .map_err(|e| anyhow::anyhow!("Invalid configuration {}: {:#}", path.display(), e))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    if explicit {
        anyhow::bail!("Configuration file {} not found", path.display());
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}
