//! Command-line interface for Assetpack
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `build`: One-off build
//! - `watch`: Build, then rebuild incrementally on file changes

mod build;
mod progress;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::{BuildArgs, BuildCommand};
pub use progress::ProgressReporter;
pub use watch::WatchCommand;

/// Assetpack - a multi-asset bundler with an incremental asset graph
#[derive(Parser, Debug)]
#[command(name = "assetpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to assetpack.toml config file
    #[arg(short, long, global = true, default_value = "assetpack.toml", env = "ASSETPACK_CONFIG")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the project once
    Build(BuildCommand),

    /// Build the project and rebuild whenever a source file changes
    Watch(WatchCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute(&self.config).await,
            Commands::Watch(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the Assetpack banner
fn print_banner() {
    eprintln!(
        "\n{} {}\n",
        "Assetpack".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
