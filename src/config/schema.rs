//! Configuration schema definitions

use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentOptions;

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Build mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Public URL prefix for emitted references
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Generate asset manifest
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            public_url: default_public_url(),
            manifest: true,
        }
    }
}

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_public_url() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// Transform cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory, relative to the project root
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> String {
    ".assetpack-cache".to_string()
}

/// Feature flags configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Minify output; defaults to on in production mode
    #[serde(default)]
    pub minify: Option<bool>,

    /// Emit source maps
    #[serde(default = "default_true")]
    pub source_maps: bool,

    /// Treat every stylesheet as a CSS module
    #[serde(default)]
    pub css_modules: bool,

    /// CSS modules pattern for class names
    #[serde(default = "default_css_modules_pattern")]
    pub css_modules_pattern: String,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            minify: None,
            source_maps: true,
            css_modules: false,
            css_modules_pattern: default_css_modules_pattern(),
        }
    }
}

fn default_css_modules_pattern() -> String {
    "[name]__[local]__[hash:8]".to_string()
}

/// A build target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    /// Output directory for this target; defaults to `<output.dir>/<name>`
    #[serde(default)]
    pub dist_dir: Option<String>,

    #[serde(flatten)]
    pub env: EnvironmentOptions,
}

/// Which plugins handle files matching a glob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobRule {
    pub glob: String,

    #[serde(rename = "use")]
    pub plugins: Vec<String>,
}

impl GlobRule {
    pub fn new(glob: &str, plugins: &[&str]) -> Self {
        Self {
            glob: glob.to_string(),
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Plugin configuration.
///
/// Glob rules declared in the config file are tried before the built-in
/// rules; the first matching rule wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub resolvers: Vec<String>,

    #[serde(default)]
    pub transformers: Vec<GlobRule>,

    #[serde(default)]
    pub bundler: Option<String>,

    #[serde(default)]
    pub namers: Vec<String>,

    #[serde(default)]
    pub runtimes: Vec<String>,

    #[serde(default)]
    pub packagers: Vec<GlobRule>,

    #[serde(default)]
    pub optimizers: Vec<GlobRule>,

    #[serde(default)]
    pub reporters: Vec<String>,
}

impl PluginsConfig {
    /// The built-in plugin set
    pub fn builtin() -> Self {
        Self {
            resolvers: vec!["default".into()],
            transformers: vec![
                GlobRule::new("*.{js,mjs,cjs,jsx}", &["js"]),
                GlobRule::new("*.css", &["css"]),
                GlobRule::new("*.json", &["json"]),
                GlobRule::new("*", &["raw"]),
            ],
            bundler: Some("default".into()),
            namers: vec!["default".into()],
            runtimes: vec!["js".into()],
            packagers: vec![
                GlobRule::new("*.js", &["js"]),
                GlobRule::new("*.css", &["css"]),
                GlobRule::new("*", &["raw"]),
            ],
            optimizers: vec![
                GlobRule::new("*.js", &["js"]),
                GlobRule::new("*.css", &["css"]),
            ],
            reporters: vec!["tracing".into()],
        }
    }

    /// Layer user rules over the built-in ones
    pub fn merged_with_builtin(&self) -> Self {
        let builtin = Self::builtin();
        let layer = |user: &[GlobRule], base: Vec<GlobRule>| -> Vec<GlobRule> {
            user.iter().cloned().chain(base).collect()
        };
        let or_builtin = |user: &[String], base: Vec<String>| -> Vec<String> {
            if user.is_empty() {
                base
            } else {
                user.to_vec()
            }
        };

        Self {
            resolvers: or_builtin(&self.resolvers, builtin.resolvers),
            transformers: layer(&self.transformers, builtin.transformers),
            bundler: self.bundler.clone().or(builtin.bundler),
            namers: or_builtin(&self.namers, builtin.namers),
            runtimes: or_builtin(&self.runtimes, builtin.runtimes),
            packagers: layer(&self.packagers, builtin.packagers),
            optimizers: layer(&self.optimizers, builtin.optimizers),
            reporters: or_builtin(&self.reporters, builtin.reporters),
        }
    }
}
