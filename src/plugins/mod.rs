//! Plugin registry
//!
//! Plugins are looked up by name once at build start and held as trait
//! objects. Transformers, packagers and optimizers are selected per file by
//! glob; the first matching rule wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use globset::{Glob, GlobMatcher};
use tracing::warn;

use crate::bundler::{Bundler, DefaultBundler};
use crate::config::{GlobRule, PluginsConfig};
use crate::error::BuildError;
use crate::namer::{DefaultNamer, Namer};
use crate::packager::{
    CssOptimizer, CssPackager, JsOptimizer, JsPackager, Optimizer, Packager, RawPackager,
};
use crate::reporter::{Reporter, ReporterEvent, TracingReporter};
use crate::resolver::{FileResolver, Resolver};
use crate::runtime::{JsRuntime, Runtime};
use crate::transform::{
    CssTransformer, JsTransformer, JsonTransformer, RawTransformer, Transformer,
};
use crate::types::Dependency;

/// The transformers that apply to one file, in order
#[derive(Clone)]
pub struct TransformerChain {
    /// Identifies the rule that produced the chain
    pub id: String,
    pub transformers: Vec<Arc<dyn Transformer>>,
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain").field("id", &self.id).finish()
    }
}

/// Named plugin instances available to a registry
#[derive(Default)]
pub struct PluginCatalog {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    transformers: HashMap<String, Arc<dyn Transformer>>,
    bundlers: HashMap<String, Arc<dyn Bundler>>,
    namers: HashMap<String, Arc<dyn Namer>>,
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    packagers: HashMap<String, Arc<dyn Packager>>,
    optimizers: HashMap<String, Arc<dyn Optimizer>>,
    reporters: HashMap<String, Arc<dyn Reporter>>,
}

impl PluginCatalog {
    /// Catalog holding every built-in plugin
    pub fn builtin() -> Self {
        let mut catalog = Self::default();

        catalog.add_resolver(Arc::new(FileResolver::new()));

        catalog.add_transformer(Arc::new(JsTransformer::new()));
        catalog.add_transformer(Arc::new(CssTransformer::new()));
        catalog.add_transformer(Arc::new(JsonTransformer::new()));
        catalog.add_transformer(Arc::new(RawTransformer::new()));

        catalog.add_bundler(Arc::new(DefaultBundler::new()));
        catalog.add_namer(Arc::new(DefaultNamer::new()));
        catalog.add_runtime(Arc::new(JsRuntime::new()));

        catalog.add_packager(Arc::new(JsPackager::new()));
        catalog.add_packager(Arc::new(CssPackager::new()));
        catalog.add_packager(Arc::new(RawPackager::new()));

        catalog.add_optimizer(Arc::new(JsOptimizer::new()));
        catalog.add_optimizer(Arc::new(CssOptimizer::new()));

        catalog.add_reporter(Arc::new(TracingReporter::new()));

        catalog
    }

    pub fn add_resolver(&mut self, plugin: Arc<dyn Resolver>) {
        self.resolvers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_transformer(&mut self, plugin: Arc<dyn Transformer>) {
        self.transformers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_bundler(&mut self, plugin: Arc<dyn Bundler>) {
        self.bundlers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_namer(&mut self, plugin: Arc<dyn Namer>) {
        self.namers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_runtime(&mut self, plugin: Arc<dyn Runtime>) {
        self.runtimes.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_packager(&mut self, plugin: Arc<dyn Packager>) {
        self.packagers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_optimizer(&mut self, plugin: Arc<dyn Optimizer>) {
        self.optimizers.insert(plugin.name().to_string(), plugin);
    }

    pub fn add_reporter(&mut self, plugin: Arc<dyn Reporter>) {
        self.reporters.insert(plugin.name().to_string(), plugin);
    }
}

/// A glob rule with its plugins looked up
struct GlobEntry<T: ?Sized> {
    glob: String,
    matcher: GlobMatcher,
    names: Vec<String>,
    plugins: Vec<Arc<T>>,
}

impl<T: ?Sized> GlobEntry<T> {
    fn matches(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name)
    }
}

/// Look up every name of `names` in `available`
fn lookup<T: ?Sized>(
    kind: &str,
    names: &[String],
    available: &HashMap<String, Arc<T>>,
) -> Result<Vec<Arc<T>>, BuildError> {
    names
        .iter()
        .map(|name| {
            available.get(name).cloned().ok_or_else(|| {
                BuildError::Configuration(format!("Unknown {} plugin '{}'", kind, name))
            })
        })
        .collect()
}

fn compile_rules<T: ?Sized>(
    kind: &str,
    rules: &[GlobRule],
    available: &HashMap<String, Arc<T>>,
) -> Result<Vec<GlobEntry<T>>, BuildError> {
    rules
        .iter()
        .map(|rule| {
            let matcher = Glob::new(&rule.glob)
                .map_err(|e| {
                    BuildError::Configuration(format!(
                        "Invalid {} glob '{}': {}",
                        kind, rule.glob, e
                    ))
                })?
                .compile_matcher();

            Ok(GlobEntry {
                glob: rule.glob.clone(),
                matcher,
                names: rule.plugins.clone(),
                plugins: lookup(kind, &rule.plugins, available)?,
            })
        })
        .collect()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Plugins resolved for one build configuration
pub struct PluginRegistry {
    resolvers: Vec<Arc<dyn Resolver>>,
    transformers: Vec<GlobEntry<dyn Transformer>>,
    bundler: Arc<dyn Bundler>,
    namers: Vec<Arc<dyn Namer>>,
    runtimes: Vec<Arc<dyn Runtime>>,
    packagers: Vec<GlobEntry<dyn Packager>>,
    optimizers: Vec<GlobEntry<dyn Optimizer>>,
    reporters: Vec<Arc<dyn Reporter>>,
}

impl PluginRegistry {
    /// Registry using only the built-in plugins
    pub fn from_config(config: &PluginsConfig) -> Result<Self, BuildError> {
        Self::new(config, &PluginCatalog::builtin())
    }

    /// Resolve every plugin named by `config` (layered over the built-in
    /// rules) from `catalog`
    pub fn new(config: &PluginsConfig, catalog: &PluginCatalog) -> Result<Self, BuildError> {
        let config = config.merged_with_builtin();

        let bundler_name = config.bundler.clone().unwrap_or_else(|| "default".to_string());
        let bundler = catalog.bundlers.get(&bundler_name).cloned().ok_or_else(|| {
            BuildError::Configuration(format!("Unknown bundler plugin '{}'", bundler_name))
        })?;

        Ok(Self {
            resolvers: lookup("resolver", &config.resolvers, &catalog.resolvers)?,
            transformers: compile_rules("transformer", &config.transformers, &catalog.transformers)?,
            bundler,
            namers: lookup("namer", &config.namers, &catalog.namers)?,
            runtimes: lookup("runtime", &config.runtimes, &catalog.runtimes)?,
            packagers: compile_rules("packager", &config.packagers, &catalog.packagers)?,
            optimizers: compile_rules("optimizer", &config.optimizers, &catalog.optimizers)?,
            reporters: lookup("reporter", &config.reporters, &catalog.reporters)?,
        })
    }

    /// The transformer chain for a file, chosen by its file name
    pub fn transformers_for(&self, path: &Path) -> Result<TransformerChain> {
        let file_name = file_name_of(path);
        let entry = self
            .transformers
            .iter()
            .find(|entry| entry.matches(&file_name))
            .ok_or_else(|| anyhow!("No transformers found for {}", path.display()))?;

        Ok(TransformerChain {
            id: format!("{}:{}", entry.glob, entry.names.join(",")),
            transformers: entry.plugins.clone(),
        })
    }

    /// Ask each resolver in turn; the first to find a file wins
    pub fn resolve(&self, dependency: &Dependency, root: &Path) -> Result<Option<PathBuf>> {
        for resolver in &self.resolvers {
            if let Some(path) = resolver.resolve(dependency, root)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub fn bundler(&self) -> &dyn Bundler {
        self.bundler.as_ref()
    }

    pub fn namers(&self) -> &[Arc<dyn Namer>] {
        &self.namers
    }

    pub fn runtimes(&self) -> &[Arc<dyn Runtime>] {
        &self.runtimes
    }

    /// Packager for an output file name
    pub fn packager_for(&self, file_name: &str) -> Option<Arc<dyn Packager>> {
        self.packagers
            .iter()
            .find(|entry| entry.matches(file_name))
            .and_then(|entry| entry.plugins.first().cloned())
    }

    /// Optimizers for an output file name, in order
    pub fn optimizers_for(&self, file_name: &str) -> Vec<Arc<dyn Optimizer>> {
        self.optimizers
            .iter()
            .find(|entry| entry.matches(file_name))
            .map(|entry| entry.plugins.clone())
            .unwrap_or_default()
    }

    /// Register an extra reporter, e.g. a terminal progress display
    pub fn add_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Notify every reporter. Reporter failures are logged and ignored.
    pub async fn report(&self, event: &ReporterEvent) {
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(event).await {
                warn!("Reporter '{}' failed: {:#}", reporter.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "transformers",
                &self.transformers.iter().map(|e| &e.glob).collect::<Vec<_>>(),
            )
            .field("bundler", &self.bundler.name())
            .field("reporters", &self.reporters.len())
            .finish_non_exhaustive()
    }
}
