//! Vidplay CLI - Headless playback session driver
//!
//! Features:
//! - Scripted playback runs against the simulated engine
//! - Effective configuration dump
//! - Source descriptor probing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod script;

/// Vidplay CLI - Playback session toolkit
#[derive(Parser)]
#[command(name = "vidplay-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Drive and inspect vidplay playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a playback script against the simulated engine
    Run {
        /// Script file (JSON)
        script: PathBuf,

        /// Hide the position bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show the effective session configuration
    Config {
        /// Configuration file (JSON); defaults apply when omitted
        #[arg(short = 'F', long)]
        file: Option<PathBuf>,
    },

    /// Validate a source locator and show how it resolves
    Probe {
        /// URL or asset path
        locator: String,

        /// Treat the locator as a bundled asset path
        #[arg(long)]
        asset: bool,

        /// License server URL
        #[arg(long)]
        license_url: Option<String>,

        /// Certificate URL
        #[arg(long)]
        certificate_url: Option<String>,

        /// Route through the content cache under this key
        #[arg(long)]
        cache_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    vidplay_core::init();

    match cli.command {
        Commands::Run { script, no_progress } => {
            commands::run(&script, !no_progress, &cli.format).await?;
        }
        Commands::Config { file } => {
            commands::config(file.as_deref(), &cli.format)?;
        }
        Commands::Probe {
            locator,
            asset,
            license_url,
            certificate_url,
            cache_key,
        } => {
            let probe = commands::ProbeArgs {
                locator,
                asset,
                license_url,
                certificate_url,
                cache_key,
            };
            commands::probe(probe, &cli.format)?;
        }
    }

    Ok(())
}
