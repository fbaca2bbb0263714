//! Watch command implementation

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::BuildOptions;

use super::build::{print_failure, print_summary};
use super::BuildArgs;

/// Build, then rebuild whenever a file under the root changes
#[derive(Args, Debug)]
pub struct WatchCommand {
    #[command(flatten)]
    pub args: BuildArgs,

    /// Milliseconds to wait for more changes before rebuilding
    #[arg(long, default_value = "100")]
    pub debounce: u64,
}

impl WatchCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let (config, options) = self.args.load(config_path)?;
        let root = options.root.clone();
        let ignored = ignored_dirs(&options);

        let mut assetpack = self.args.assetpack(&config, options)?;
        match assetpack.build().await {
            Ok(result) => print_summary(&result),
            Err(failure) => print_failure(&failure),
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(self.debounce), move |result: DebounceEventResult| {
            // The receiver only goes away when the command exits
            let _ = tx.send(result);
        })?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        eprintln!(
            "{} Watching {} for changes. Press {} to stop\n",
            "→".blue(),
            root.display().to_string().cyan(),
            "Ctrl+C".yellow()
        );

        while let Some(result) = rx.recv().await {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    error!("Watch error: {:?}", e);
                    continue;
                }
            };

            let mut changed: Vec<PathBuf> = events
                .into_iter()
                .map(|event| event.path)
                .filter(|path| !ignored.iter().any(|dir| path.starts_with(dir)))
                .collect();
            changed.sort();
            changed.dedup();
            if changed.is_empty() {
                continue;
            }

            for path in &changed {
                debug!("Changed: {}", path.display());
                eprintln!(
                    "  {} File changed: {}",
                    "↻".yellow(),
                    relative_to(&root, path).dimmed()
                );
            }

            match assetpack.rebuild(&changed).await {
                Ok(result) => print_summary(&result),
                Err(failure) => print_failure(&failure),
            }
        }

        Ok(())
    }
}

/// Directories the build writes to; changes there never trigger a rebuild
fn ignored_dirs(options: &BuildOptions) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = options.targets.iter().map(|t| t.dist_dir.clone()).collect();
    dirs.push(options.cache_dir.clone());
    dirs
}

fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
