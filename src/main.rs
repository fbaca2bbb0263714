//! Assetpack - a multi-asset bundler with an incremental asset graph
//!
//! # Features
//! - JavaScript, CSS, JSON and binary assets in one dependency graph
//! - Code splitting at dynamic imports with injected loader runtimes
//! - CSS co-bundling and CSS modules
//! - Content-hashed output names and a persistent transform cache
//! - Incremental rebuilds in watch mode

use anyhow::Result;
use assetpack_lib::Cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("assetpack=debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("assetpack=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    cli.execute().await
}
