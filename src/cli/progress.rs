//! Terminal progress display

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::reporter::{Reporter, ReporterEvent};

/// Shows a spinner with the current build phase
#[derive(Default)]
pub struct ProgressReporter {
    spinner: Mutex<Option<ProgressBar>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(100));

        if let Some(previous) = self.spinner.lock().replace(spinner) {
            previous.finish_and_clear();
        }
    }

    fn finish(&self) {
        if let Some(spinner) = self.spinner.lock().take() {
            spinner.finish_and_clear();
        }
    }
}

#[async_trait]
impl Reporter for ProgressReporter {
    fn name(&self) -> &str {
        "progress"
    }

    async fn report(&self, event: &ReporterEvent) -> Result<()> {
        match event {
            ReporterEvent::BuildStart => self.start(),
            ReporterEvent::BuildProgress { phase, message } => {
                if let Some(spinner) = self.spinner.lock().as_ref() {
                    match message {
                        Some(message) => spinner.set_message(format!("{} {}", phase.as_str(), message)),
                        None => spinner.set_message(format!("{}...", phase.as_str())),
                    }
                }
            }
            ReporterEvent::Log { .. } => {}
            ReporterEvent::BuildSuccess { .. } | ReporterEvent::BuildFailure { .. } => self.finish(),
        }
        Ok(())
    }
}
