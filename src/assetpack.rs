//! Build orchestration
//!
//! [`Assetpack`] owns everything that outlives a single build: the plugin
//! registry, the worker pool, the transform cache and the asset graph. A
//! build runs the phases in order (graph construction, bundling, runtime
//! injection, naming, packaging, optimizing) and only touches the output
//! directories once every bundle has been packaged.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::bundler::{Bundle, BundleGraph};
use crate::cache::ContentCache;
use crate::config::{BuildOptions, Config};
use crate::error::{BuildError, BuildFailure, Diagnostic};
use crate::graph::{AssetGraph, AssetGraphBuilder, GraphReport, NodeId};
use crate::packager::{public_path, PackagedBundle};
use crate::plugins::PluginRegistry;
use crate::reporter::{BuildPhase, BuildStats, ReporterEvent};
use crate::types::Dependency;
use crate::utils::{clean_path, relative_path};
use crate::worker::WorkerPool;

const MANIFEST_FILE: &str = "manifest.json";

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Written bundles, in load order
    pub bundles: Vec<BundleInfo>,

    /// Bundle name to public URL
    pub manifest: BTreeMap<String, String>,

    pub stats: BuildStats,

    /// Non-fatal diagnostics
    pub warnings: Vec<Diagnostic>,
}

/// Information about a written bundle
#[derive(Debug, Clone)]
pub struct BundleInfo {
    pub name: String,
    pub bundle_type: String,
    pub is_entry: bool,

    /// Output file path
    pub output_path: PathBuf,

    /// Bundle size in bytes
    pub size: usize,

    /// Source map path (if generated)
    pub sourcemap_path: Option<PathBuf>,

    /// Source files of the bundled assets, in output order
    pub asset_paths: Vec<PathBuf>,
}

/// A packaged bundle waiting to be written
struct Output {
    info: BundleInfo,
    contents: Vec<u8>,
    map: Option<String>,
}

pub struct Assetpack {
    options: Arc<BuildOptions>,
    registry: Arc<PluginRegistry>,
    pool: WorkerPool,
    cache: ContentCache,
    graph: Arc<AssetGraph>,
    bundle_graph: Option<BundleGraph>,
}

impl Assetpack {
    /// Create a build for `config` using the built-in plugins. Must be
    /// called inside a tokio runtime.
    pub fn new(config: &Config, options: BuildOptions) -> Result<Self, BuildError> {
        let registry = PluginRegistry::from_config(&config.plugins)?;
        Self::with_registry(registry, options)
    }

    /// Create a build with an already configured registry
    pub fn with_registry(registry: PluginRegistry, options: BuildOptions) -> Result<Self, BuildError> {
        let cache = if options.cache_enabled {
            ContentCache::open(&options.cache_dir).map_err(|e| BuildError::Io {
                path: options.cache_dir.clone(),
                message: format!("{:#}", e),
            })?
        } else {
            ContentCache::in_memory()
        };

        let options = Arc::new(options);
        let registry = Arc::new(registry);
        let pool = WorkerPool::new(options.workers, registry.clone(), options.clone());

        debug!("Created build with {} workers: {:?}", pool.size(), registry);

        Ok(Self {
            options,
            registry,
            pool,
            cache,
            graph: Arc::new(AssetGraph::new()),
            bundle_graph: None,
        })
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn asset_graph(&self) -> &AssetGraph {
        &self.graph
    }

    /// Bundle graph of the last successful build
    pub fn bundle_graph(&self) -> Option<&BundleGraph> {
        self.bundle_graph.as_ref()
    }

    /// Build every entry for every target
    pub async fn build(&mut self) -> Result<BuildResult, BuildFailure> {
        // Release the last bundle graph's handle so the asset graph is not cloned
        self.bundle_graph = None;
        let graph = Arc::make_mut(&mut self.graph);
        for entry in &self.options.entries {
            let specifier = relative_path(&self.options.root, entry)
                .unwrap_or_else(|| entry.to_string_lossy().to_string());
            for target in &self.options.targets {
                graph.add_entry_dependency(Dependency::entry(specifier.clone(), target.clone()));
            }
        }

        let seeds = graph.pending_dependencies();
        self.run(seeds).await
    }

    /// Rebuild after `changed` files were modified, created or deleted
    pub async fn rebuild(&mut self, changed: &[PathBuf]) -> Result<BuildResult, BuildFailure> {
        self.bundle_graph = None;
        let graph = Arc::make_mut(&mut self.graph);
        for path in changed {
            let path = clean_path(path);
            self.cache.invalidate_path(&path);
            let reseeded = graph.invalidate_file(&path);
            debug!("{} invalidated {} dependencies", path.display(), reseeded.len());
        }

        let pruned = graph.prune_unreachable();
        if pruned > 0 {
            debug!("Pruned {} unreachable nodes", pruned);
        }

        // Also retries dependencies that failed or were missing last time
        let seeds = graph.pending_dependencies();
        self.run(seeds).await
    }

    async fn run(&mut self, seeds: Vec<NodeId>) -> Result<BuildResult, BuildFailure> {
        let start = Instant::now();
        self.registry.report(&ReporterEvent::BuildStart).await;

        let result = self.run_phases(seeds, start).await;

        if let Err(e) = self.cache.flush() {
            warn!("Failed to write cache: {:#}", e);
        }

        match &result {
            Ok(result) => {
                self.registry
                    .report(&ReporterEvent::BuildSuccess {
                        stats: result.stats.clone(),
                    })
                    .await
            }
            Err(failure) => {
                self.registry
                    .report(&ReporterEvent::BuildFailure {
                        diagnostics: failure.diagnostics.clone(),
                    })
                    .await
            }
        }

        result
    }

    async fn run_phases(&mut self, seeds: Vec<NodeId>, start: Instant) -> Result<BuildResult, BuildFailure> {
        self.bundle_graph = None;
        let report: GraphReport = AssetGraphBuilder::new(
            Arc::make_mut(&mut self.graph),
            &mut self.cache,
            &self.registry,
            &self.options,
            &self.pool,
        )
        .build(seeds)
        .await?;

        for warning in &report.warnings {
            self.registry
                .report(&ReporterEvent::Log {
                    level: warning.severity,
                    message: warning.to_string(),
                })
                .await;
        }

        self.progress(BuildPhase::Bundling).await;
        let mut bundle_graph = BundleGraph::new(self.graph.clone());
        self.registry
            .bundler()
            .bundle(&self.graph, &mut bundle_graph, &self.options)
            .map_err(|e| build_error(e, BuildError::GraphInvariant))?;

        self.inject_runtimes(&mut bundle_graph)?;
        self.name_bundles(&mut bundle_graph)?;

        self.progress(BuildPhase::Packaging).await;
        let order = bundle_graph.traverse_bundles();
        let mut packaged = Vec::new();
        for bundle_id in &order {
            let Some(bundle) = bundle_graph.bundle(bundle_id) else {
                continue;
            };
            if bundle.assets.is_empty() {
                continue;
            }
            packaged.push((bundle, self.package(bundle, &bundle_graph)?));
        }

        self.progress(BuildPhase::Optimizing).await;
        let mut outputs = Vec::new();
        for (bundle, output) in packaged {
            let output = self.optimize(bundle, output)?;
            outputs.push(self.finish(bundle, &bundle_graph, output)?);
        }

        let manifest = self.write_outputs(&outputs)?;

        let bundles: Vec<BundleInfo> = outputs.into_iter().map(|o| o.info).collect();
        let stats = BuildStats {
            duration: start.elapsed(),
            assets: self.graph.asset_count(),
            bundles: bundles.len(),
            total_size: bundles.iter().map(|b| b.size).sum(),
            cache_hits: report.cache_hits,
            warnings: report.warnings.len(),
        };

        info!("Wrote {} bundle(s)", bundles.len());
        self.bundle_graph = Some(bundle_graph);

        Ok(BuildResult {
            bundles,
            manifest,
            stats,
            warnings: report.warnings,
        })
    }

    async fn progress(&self, phase: BuildPhase) {
        self.registry
            .report(&ReporterEvent::BuildProgress {
                phase,
                message: None,
            })
            .await;
    }

    /// Add loader assets to bundles that start dynamic imports
    fn inject_runtimes(&self, bundle_graph: &mut BundleGraph) -> Result<(), BuildFailure> {
        for bundle_id in bundle_graph.traverse_bundles() {
            let Some(bundle) = bundle_graph.bundle(&bundle_id) else {
                continue;
            };

            let mut injected = Vec::new();
            for runtime in self.registry.runtimes() {
                let assets = runtime
                    .apply(bundle, bundle_graph, &self.options)
                    .map_err(|e| package_error(bundle, e))?;
                injected.extend(assets);
            }

            for runtime_asset in injected {
                let asset_id = runtime_asset.asset.id.clone();
                bundle_graph.add_runtime_asset(&bundle_id, runtime_asset.asset, runtime_asset.links)?;
                if let Some(dependency_id) = runtime_asset.dependency_id {
                    bundle_graph.set_dependency_runtime(&dependency_id, &asset_id);
                }
            }
        }
        Ok(())
    }

    /// Ask each namer in turn; the first name returned wins
    fn name_bundles(&self, bundle_graph: &mut BundleGraph) -> Result<(), BuildFailure> {
        for bundle_id in bundle_graph.traverse_bundles() {
            let Some(bundle) = bundle_graph.bundle(&bundle_id) else {
                continue;
            };

            let mut name = None;
            for namer in self.registry.namers() {
                name = namer
                    .name_bundle(bundle, bundle_graph, &self.options)
                    .map_err(|e| package_error(bundle, e))?;
                if name.is_some() {
                    break;
                }
            }

            let name = name.ok_or_else(|| {
                BuildError::GraphInvariant(format!("No namer named bundle {}", bundle_id))
            })?;
            debug!("Named bundle {} {}", bundle_id, name);
            bundle_graph.set_name(&bundle_id, name)?;
        }
        Ok(())
    }

    fn package(&self, bundle: &Bundle, bundle_graph: &BundleGraph) -> Result<PackagedBundle, BuildFailure> {
        let name = bundle.display_name();
        let packager = self.registry.packager_for(&name).ok_or_else(|| {
            BuildError::Configuration(format!("No packager configured for {}", name))
        })?;

        debug!("Packaging {} with '{}'", name, packager.name());
        Ok(packager
            .package(bundle, bundle_graph, &self.options)
            .map_err(|e| package_error(bundle, e))?)
    }

    fn optimize(&self, bundle: &Bundle, mut packaged: PackagedBundle) -> Result<PackagedBundle, BuildFailure> {
        for optimizer in self.registry.optimizers_for(&bundle.display_name()) {
            packaged = optimizer
                .optimize(bundle, packaged, &self.options)
                .map_err(|e| package_error(bundle, e))?;
        }
        Ok(packaged)
    }

    /// Attach the source map reference and collect what gets written
    fn finish(&self, bundle: &Bundle, bundle_graph: &BundleGraph, packaged: PackagedBundle) -> Result<Output, BuildFailure> {
        let name = bundle.display_name();
        let output_path = bundle
            .file_path
            .clone()
            .unwrap_or_else(|| bundle.target.dist_dir.join(&name));

        let mut contents = packaged.contents.into_bytes();
        let sourcemap_path = match &packaged.map {
            Some(_) => {
                let map_name = format!("{}.map", name);
                let comment = match bundle.bundle_type.as_str() {
                    "css" => Some(format!("\n/*# sourceMappingURL={} */\n", map_name)),
                    "js" => Some(format!("\n//# sourceMappingURL={}\n", map_name)),
                    _ => None,
                };
                if let Some(comment) = comment {
                    contents.extend_from_slice(comment.as_bytes());
                }
                Some(output_path.with_file_name(map_name))
            }
            None => None,
        };

        let asset_paths = bundle
            .assets
            .iter()
            .filter_map(|id| bundle_graph.asset(id))
            .map(|asset| asset.file_path.clone())
            .collect();

        Ok(Output {
            info: BundleInfo {
                name,
                bundle_type: bundle.bundle_type.clone(),
                is_entry: bundle.is_entry,
                output_path,
                size: contents.len(),
                sourcemap_path,
                asset_paths,
            },
            contents,
            map: packaged.map,
        })
    }

    /// Write bundles, source maps and one manifest per output directory
    fn write_outputs(&self, outputs: &[Output]) -> Result<BTreeMap<String, String>, BuildFailure> {
        let mut manifest = BTreeMap::new();
        let mut per_dir: BTreeMap<PathBuf, BTreeMap<String, String>> = BTreeMap::new();

        for output in outputs {
            write_file(&output.info.output_path, &output.contents)?;
            if let (Some(path), Some(map)) = (&output.info.sourcemap_path, &output.map) {
                write_file(path, map.as_bytes())?;
            }

            let url = public_path(&self.options.public_url, &output.info.name);
            manifest.insert(output.info.name.clone(), url.clone());
            if let Some(dir) = output.info.output_path.parent() {
                per_dir
                    .entry(dir.to_path_buf())
                    .or_default()
                    .insert(output.info.name.clone(), url);
            }
        }

        if self.options.manifest {
            for (dir, entries) in per_dir {
                let path = dir.join(MANIFEST_FILE);
                let json = serde_json::to_vec_pretty(&entries).map_err(|e| BuildError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                write_file(&path, &json)?;
            }
        }

        Ok(manifest)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), BuildError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, &e))?;
    }
    fs::write(path, contents).map_err(|e| BuildError::io(path, &e))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Recover a typed error from a plugin, or wrap its message
fn build_error(error: anyhow::Error, wrap: impl FnOnce(String) -> BuildError) -> BuildError {
    match error.downcast::<BuildError>() {
        Ok(error) => error,
        Err(error) => wrap(format!("{:#}", error)),
    }
}

fn package_error(bundle: &Bundle, error: anyhow::Error) -> BuildError {
    build_error(error, |message| BuildError::Package {
        name: bundle.display_name(),
        message,
    })
}
