//! Build command implementation

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::assetpack::{Assetpack, BuildResult};
use crate::config::{BuildOptions, Config, Mode};
use crate::error::{BuildFailure, Diagnostic, Severity};
use crate::plugins::PluginRegistry;
use crate::utils::{format_duration, format_size};

use super::ProgressReporter;

/// Flags shared by `build` and `watch`
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Output directory, overriding `output.dir`
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Build in production mode (minified)
    #[arg(long)]
    pub production: bool,

    /// Disable minification even in production mode
    #[arg(long)]
    pub no_minify: bool,

    /// Emit source maps
    #[arg(long)]
    pub source_maps: bool,

    /// Do not read or write the transform cache
    #[arg(long)]
    pub no_cache: bool,

    /// Public URL prefix for emitted references
    #[arg(long)]
    pub public_url: Option<String>,
}

impl BuildArgs {
    /// Load the config file and apply the flags on top of it
    pub fn load(&self, config_path: &str) -> Result<(Config, BuildOptions)> {
        info!("Loading configuration from {}", config_path);
        let mut config = Config::load(config_path)?;

        if self.production {
            config.mode = Mode::Production;
        }
        if let Some(outdir) = &self.outdir {
            config.output.dir = outdir.to_string_lossy().to_string();
        }

        let mut options = BuildOptions::from_config(&config)?;
        if self.no_minify {
            options.minify = false;
        }
        if self.source_maps {
            options.source_maps = true;
        }
        if self.no_cache {
            options.cache_enabled = false;
        }
        if let Some(public_url) = &self.public_url {
            options.public_url = public_url.clone();
        }

        Ok((config, options))
    }

    /// Create a build reporting progress to the terminal
    pub fn assetpack(&self, config: &Config, options: BuildOptions) -> Result<Assetpack> {
        let mut registry = PluginRegistry::from_config(&config.plugins)?;
        registry.add_reporter(Arc::new(ProgressReporter::new()));
        Ok(Assetpack::with_registry(registry, options)?)
    }
}

/// Build the project once
#[derive(Args, Debug)]
pub struct BuildCommand {
    #[command(flatten)]
    pub args: BuildArgs,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let (config, options) = self.args.load(config_path)?;

        eprintln!(
            "{} Building {} ({})...",
            "→".blue(),
            config.project.name.bold(),
            if options.is_production() { "production" } else { "development" }
        );

        let mut assetpack = self.args.assetpack(&config, options)?;
        match assetpack.build().await {
            Ok(result) => {
                print_summary(&result);
                Ok(())
            }
            Err(failure) => {
                print_failure(&failure);
                Err(failure.into())
            }
        }
    }
}

/// Print bundle sizes and any warnings
pub(crate) fn print_summary(result: &BuildResult) {
    eprintln!(
        "\n{} Built {} bundle(s) in {}\n",
        "✓".green().bold(),
        result.bundles.len(),
        format_duration(result.stats.duration)
    );

    for bundle in &result.bundles {
        eprintln!(
            "  {} {} {}",
            "•".dimmed(),
            bundle.output_path.display().to_string().cyan(),
            format_size(bundle.size).dimmed()
        );
    }

    if result.stats.cache_hits > 0 {
        eprintln!(
            "\n  {} {} asset(s) from cache",
            "•".dimmed(),
            result.stats.cache_hits
        );
    }

    for warning in &result.warnings {
        print_diagnostic(warning);
    }
    eprintln!();
}

pub(crate) fn print_failure(failure: &BuildFailure) {
    eprintln!(
        "\n{} Build failed with {} error(s)\n",
        "✗".red().bold(),
        failure.diagnostics.iter().filter(|d| d.is_fatal()).count()
    );
    for diagnostic in &failure.diagnostics {
        print_diagnostic(diagnostic);
    }
    eprintln!();
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic.severity {
        Severity::Error => eprintln!("  {} {}", "error".red().bold(), diagnostic.error),
        Severity::Warning => eprintln!("  {} {}", "warning".yellow().bold(), diagnostic.error),
    }
}
