//! Configuration handling for Assetpack
//!
//! Parses and manages assetpack.toml configuration files and derives the
//! immutable [`BuildOptions`] every build phase reads.

mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::Glob;
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::environment::{Environment, Target};
use crate::error::BuildError;
use crate::utils::clean_path;

pub use schema::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Entry files or globs, relative to the root
    #[serde(default)]
    pub entries: Vec<String>,

    #[serde(default)]
    pub mode: Mode,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Feature flags
    #[serde(default)]
    pub features: FeaturesConfig,

    /// Build targets; one browser target when empty
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    /// Plugin configuration
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse assetpack.toml")?;

        // Set root directory to the directory containing the config file
        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration rooted at `root`
    pub fn default_config(root: impl Into<PathBuf>) -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            entries: vec!["src/index.js".to_string()],
            mode: Mode::Development,
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            features: FeaturesConfig::default(),
            targets: Vec::new(),
            plugins: PluginsConfig::default(),
            root: root.into(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.entries.is_empty() {
            return Err(BuildError::Configuration(
                "At least one entry must be specified in assetpack.toml".into(),
            ));
        }

        // Resolves globs and checks that plain entries exist
        self.entry_paths()?;

        for target in &self.targets {
            let Some(engines) = &target.env.engines else {
                continue;
            };
            for range in [&engines.node, &engines.electron].into_iter().flatten() {
                VersionReq::parse(range).map_err(|e| {
                    BuildError::Configuration(format!(
                        "Target '{}' has an invalid engine range '{}': {}",
                        target.name, range, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }

    /// Expand entries into absolute, sorted file paths
    pub fn entry_paths(&self) -> Result<Vec<PathBuf>, BuildError> {
        let mut paths = Vec::new();

        for entry in &self.entries {
            if is_glob(entry) {
                let matcher = Glob::new(entry)
                    .map_err(|e| {
                        BuildError::Configuration(format!("Invalid entry glob '{}': {}", entry, e))
                    })?
                    .compile_matcher();

                let before = paths.len();
                for file in WalkDir::new(&self.root)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                {
                    let relative = file.path().strip_prefix(&self.root).unwrap_or(file.path());
                    if matcher.is_match(relative) {
                        paths.push(clean_path(file.path()));
                    }
                }

                if paths.len() == before {
                    return Err(BuildError::Configuration(format!(
                        "Entry glob '{}' did not match any files",
                        entry
                    )));
                }
            } else {
                let full_path = clean_path(&self.root.join(entry));
                if !full_path.is_file() {
                    return Err(BuildError::Configuration(format!(
                        "Entry points to non-existent file: {}",
                        full_path.display()
                    )));
                }
                paths.push(full_path);
            }
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Resolve configured targets, defaulting to a single browser target
    pub fn resolved_targets(&self) -> Vec<Target> {
        if self.targets.is_empty() {
            return vec![Target {
                name: "default".to_string(),
                dist_dir: self.output_dir(),
                env: Environment::default(),
            }];
        }

        self.targets
            .iter()
            .map(|target| Target {
                name: target.name.clone(),
                dist_dir: match &target.dist_dir {
                    Some(dir) => self.root.join(dir),
                    None => self.output_dir().join(&target.name),
                },
                env: Environment::from_options(&target.env),
            })
            .collect()
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '[', '{'])
}

/// Immutable options handed to every build phase
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub root: PathBuf,
    pub entries: Vec<PathBuf>,
    pub targets: Vec<Target>,
    pub mode: Mode,
    pub minify: bool,
    pub source_maps: bool,
    pub public_url: String,
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub css_modules: bool,
    pub css_modules_pattern: String,
    pub manifest: bool,

    /// Number of transform workers
    pub workers: usize,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        Ok(Self {
            root: config.root.clone(),
            entries: config.entry_paths()?,
            targets: config.resolved_targets(),
            mode: config.mode,
            minify: config.features.minify.unwrap_or(config.is_production()),
            source_maps: config.features.source_maps,
            public_url: config.output.public_url.clone(),
            cache_enabled: config.cache.enabled,
            cache_dir: config.root.join(&config.cache.dir),
            css_modules: config.features.css_modules,
            css_modules_pattern: config.features.css_modules_pattern.clone(),
            manifest: config.output.manifest,
            workers: default_workers(),
        })
    }

    /// Development options for `root` with no entries and the cache disabled
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        let config = Config::default_config(root);
        Self {
            root: config.root.clone(),
            entries: Vec::new(),
            targets: config.resolved_targets(),
            mode: Mode::Development,
            minify: false,
            source_maps: false,
            public_url: config.output.public_url.clone(),
            cache_enabled: false,
            cache_dir: config.root.join(&config.cache.dir),
            css_modules: false,
            css_modules_pattern: config.features.css_modules_pattern.clone(),
            manifest: false,
            workers: default_workers(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentContext;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_parses_targets_and_plugins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "");
        write(
            dir.path(),
            "assetpack.toml",
            r#"
entries = ["src/index.js"]
mode = "production"

[project]
name = "demo"

[[targets]]
name = "modern"
context = "web-worker"

[[plugins.transformers]]
glob = "*.txt"
use = ["raw"]
"#,
        );

        let config = Config::load(dir.path().join("assetpack.toml")).unwrap();
        assert!(config.is_production());

        let targets = config.resolved_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].env.context, EnvironmentContext::WebWorker);
        assert_eq!(targets[0].dist_dir, dir.path().join("dist").join("modern"));

        let plugins = config.plugins.merged_with_builtin();
        assert_eq!(plugins.transformers[0].glob, "*.txt");
        assert_eq!(plugins.bundler.as_deref(), Some("default"));

        let options = BuildOptions::from_config(&config).unwrap();
        assert!(options.minify);
    }

    #[test]
    fn test_entry_globs_are_expanded_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/b.js", "");
        write(dir.path(), "src/a.js", "");
        write(dir.path(), "src/style.css", "");

        let mut config = Config::default_config(dir.path());
        config.entries = vec!["src/*.js".into()];

        let entries = config.entry_paths().unwrap();
        assert_eq!(
            entries,
            vec![dir.path().join("src/a.js"), dir.path().join("src/b.js")]
        );
    }

    #[test]
    fn test_missing_entry_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_config(dir.path());

        assert!(matches!(config.validate(), Err(BuildError::Configuration(_))));
    }

    #[test]
    fn test_invalid_engine_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "");

        let mut config = Config::default_config(dir.path());
        config.targets.push(TargetConfig {
            name: "server".into(),
            dist_dir: None,
            env: crate::environment::EnvironmentOptions {
                context: Some(EnvironmentContext::Node),
                engines: Some(crate::environment::Engines {
                    node: Some("not a range".into()),
                    ..Default::default()
                }),
                include_node_modules: None,
            },
        });

        assert!(matches!(config.validate(), Err(BuildError::Configuration(_))));
    }
}
