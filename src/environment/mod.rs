//! Compilation target descriptors
//!
//! An [`Environment`] describes where built code runs. It is an immutable
//! value: [`Environment::merge`] returns a new environment instead of
//! mutating the receiver.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::hash_parts;

/// The platform the output runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
    #[default]
    Browser,
    WebWorker,
    ServiceWorker,
    /// Server-side runtime
    Node,
    /// Embedded host such as a desktop shell
    Electron,
}

impl EnvironmentContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentContext::Browser => "browser",
            EnvironmentContext::WebWorker => "web-worker",
            EnvironmentContext::ServiceWorker => "service-worker",
            EnvironmentContext::Node => "node",
            EnvironmentContext::Electron => "electron",
        }
    }
}

/// Engine constraints, as semver ranges or browserslist queries
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Engines {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub browsers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electron: Option<String>,
}

/// Partial environment used to derive a new [`Environment`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentOptions {
    #[serde(default)]
    pub context: Option<EnvironmentContext>,

    #[serde(default)]
    pub engines: Option<Engines>,

    #[serde(default)]
    pub include_node_modules: Option<bool>,
}

/// The environment the built code will run in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub context: EnvironmentContext,

    pub engines: Engines,

    /// Whether bare specifiers are resolved into `node_modules` and bundled
    pub include_node_modules: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            context: EnvironmentContext::Browser,
            engines: Engines::default(),
            include_node_modules: true,
        }
    }
}

impl Environment {
    /// Build an environment from options, using defaults for unset fields
    pub fn from_options(options: &EnvironmentOptions) -> Self {
        Self::default().merge(options)
    }

    /// Produce a new environment overriding only the fields set in `options`
    pub fn merge(&self, options: &EnvironmentOptions) -> Self {
        Self {
            context: options.context.unwrap_or(self.context),
            engines: options.engines.clone().unwrap_or_else(|| self.engines.clone()),
            include_node_modules: options
                .include_node_modules
                .unwrap_or(self.include_node_modules),
        }
    }

    /// Stable identifier; two environments with the same id are interchangeable
    pub fn id(&self) -> String {
        let engines = serde_json::to_string(&self.engines).unwrap_or_default();
        hash_parts([
            self.context.as_str(),
            engines.as_str(),
            if self.include_node_modules { "1" } else { "0" },
        ])
    }

    /// Workers run without access to the page's already-loaded bundles
    pub fn is_isolated(&self) -> bool {
        matches!(
            self.context,
            EnvironmentContext::WebWorker | EnvironmentContext::ServiceWorker
        )
    }
}

/// A named output destination with its own environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,

    /// Directory bundles for this target are written to
    pub dist_dir: PathBuf,

    pub env: Environment,
}
