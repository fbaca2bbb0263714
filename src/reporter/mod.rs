//! Build lifecycle events
//!
//! Reporters observe a build; the core never waits on their results.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{Diagnostic, Severity};
use crate::utils::{format_duration, format_size};

/// Build phase announced by [`ReporterEvent::BuildProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Resolving,
    Transforming,
    Bundling,
    Packaging,
    Optimizing,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Resolving => "Resolving",
            BuildPhase::Transforming => "Transforming",
            BuildPhase::Bundling => "Bundling",
            BuildPhase::Packaging => "Packaging",
            BuildPhase::Optimizing => "Optimizing",
        }
    }
}

/// Summary of a successful build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    pub duration: Duration,
    pub assets: usize,
    pub bundles: usize,
    pub total_size: usize,
    /// Assets served from the transform cache
    pub cache_hits: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone)]
pub enum ReporterEvent {
    BuildStart,
    BuildProgress {
        phase: BuildPhase,
        /// Optional detail such as the file being transformed
        message: Option<String>,
    },
    Log {
        level: Severity,
        message: String,
    },
    BuildSuccess {
        stats: BuildStats,
    },
    BuildFailure {
        diagnostics: Vec<Diagnostic>,
    },
}

/// Reporter plugin contract
#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &str;

    async fn report(&self, event: &ReporterEvent) -> Result<()>;
}

/// Forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TracingReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for TracingReporter {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn report(&self, event: &ReporterEvent) -> Result<()> {
        match event {
            ReporterEvent::BuildStart => info!("Build started"),
            ReporterEvent::BuildProgress { phase, message } => match message {
                Some(message) => debug!("{}: {}", phase.as_str(), message),
                None => info!("{}...", phase.as_str()),
            },
            ReporterEvent::Log { level, message } => match level {
                Severity::Error => error!("{}", message),
                Severity::Warning => warn!("{}", message),
            },
            ReporterEvent::BuildSuccess { stats } => info!(
                "Built {} bundle(s) from {} asset(s), {} total, in {}",
                stats.bundles,
                stats.assets,
                format_size(stats.total_size),
                format_duration(stats.duration)
            ),
            ReporterEvent::BuildFailure { diagnostics } => {
                for diagnostic in diagnostics.iter().filter(|d| d.is_fatal()) {
                    error!("{}", diagnostic);
                }
            }
        }
        Ok(())
    }
}
