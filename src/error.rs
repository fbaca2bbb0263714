//! Build error taxonomy
//!
//! Component errors are wrapped in a [`Diagnostic`] carrying the id of the
//! asset or dependency that triggered them. The coordinator collects every
//! fatal diagnostic of a build attempt into one [`BuildFailure`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("Failed to resolve '{specifier}' from '{}'", from.display())]
    Resolution { specifier: String, from: PathBuf },

    #[error("Failed to transform '{}': {message}", path.display())]
    Transform { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Stale cache entry for '{}'", path.display())]
    CacheInconsistency { path: PathBuf },

    #[error("Asset graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("Failed to package '{name}': {message}")]
    Package { name: String, message: String },

    #[error("I/O error on '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl BuildError {
    pub fn transform(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        BuildError::Transform {
            path: path.into(),
            message: format!("{:#}", err),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// An error or warning attached to the part of the graph that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: BuildError,
    pub dependency_id: Option<String>,
    pub asset_id: Option<String>,
}

impl Diagnostic {
    pub fn error(error: BuildError) -> Self {
        Self {
            severity: Severity::Error,
            error,
            dependency_id: None,
            asset_id: None,
        }
    }

    pub fn warning(error: BuildError) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(error)
        }
    }

    pub fn with_dependency(mut self, dependency_id: impl Into<String>) -> Self {
        self.dependency_id = Some(dependency_id.into());
        self
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", label, self.error)
    }
}

/// The aggregated failure of one build attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub struct BuildFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildFailure {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn single(error: BuildError) -> Self {
        Self::new(vec![Diagnostic::error(error)])
    }

    pub fn errors(&self) -> impl Iterator<Item = &BuildError> {
        self.diagnostics.iter().map(|d| &d.error)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build failed with {} error(s):", self.diagnostics.len())?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {}", diagnostic)?;
        }
        Ok(())
    }
}

impl From<BuildError> for BuildFailure {
    fn from(error: BuildError) -> Self {
        BuildFailure::single(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_lists_every_diagnostic() {
        let failure = BuildFailure::new(vec![
            Diagnostic::error(BuildError::Resolution {
                specifier: "./missing".into(),
                from: PathBuf::from("/src/index.js"),
            }),
            Diagnostic::error(BuildError::Resolution {
                specifier: "./gone.css".into(),
                from: PathBuf::from("/src/other.js"),
            }),
        ]);

        let message = failure.to_string();
        assert!(message.contains("2 error(s)"));
        assert!(message.contains("'./missing' from '/src/index.js'"));
        assert!(message.contains("'./gone.css' from '/src/other.js'"));
    }
}
