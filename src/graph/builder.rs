//! Asset graph construction
//!
//! The builder is the single coordinator of a build: it owns the graph and
//! the cache for the duration of [`AssetGraphBuilder::build`], hands
//! resolution and transform jobs to the worker pool, and merges results back
//! as they arrive, in whatever order that is.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, ContentCache};
use crate::config::BuildOptions;
use crate::error::{BuildError, BuildFailure, Diagnostic};
use crate::plugins::PluginRegistry;
use crate::reporter::{BuildPhase, ReporterEvent};
use crate::transform::{TransformOutcome, TransformPipeline, TransformRequest};
use crate::types::Asset;
use crate::utils::clean_path;
use crate::worker::{Job, JobResult, WorkerPool};

use super::{AssetGraph, DependencyState, NodeId};

/// Summary of one construction pass
#[derive(Debug, Clone, Default)]
pub struct GraphReport {
    /// Non-fatal diagnostics, such as unresolved optional dependencies
    pub warnings: Vec<Diagnostic>,
    /// Files run through the transform pipeline
    pub transformed: usize,
    /// Files served from the cache
    pub cache_hits: usize,
}

/// A transform request that has been issued but not merged yet
struct PendingRequest {
    cache_key: String,
    config_hash: String,
    /// Dependencies that resolved to this request's file
    waiting: Vec<NodeId>,
}

/// A request whose transform failed in this pass
struct FailedRequest {
    error: BuildError,
    /// Whether a fatal diagnostic was already reported for it
    reported_fatal: bool,
}

pub struct AssetGraphBuilder<'a> {
    graph: &'a mut AssetGraph,
    cache: &'a mut ContentCache,
    registry: &'a PluginRegistry,
    options: &'a BuildOptions,
    pool: &'a WorkerPool,
    sender: mpsc::UnboundedSender<JobResult>,
    receiver: mpsc::UnboundedReceiver<JobResult>,
    work_count: usize,
    pending: HashMap<String, PendingRequest>,
    failed: HashMap<String, FailedRequest>,
    diagnostics: Vec<Diagnostic>,
    report: GraphReport,
}

impl<'a> AssetGraphBuilder<'a> {
    pub fn new(
        graph: &'a mut AssetGraph,
        cache: &'a mut ContentCache,
        registry: &'a PluginRegistry,
        options: &'a BuildOptions,
        pool: &'a WorkerPool,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            graph,
            cache,
            registry,
            options,
            pool,
            sender,
            receiver,
            work_count: 0,
            pending: HashMap::new(),
            failed: HashMap::new(),
            diagnostics: Vec::new(),
            report: GraphReport::default(),
        }
    }

    /// Resolve `seeds` and everything they lead to.
    ///
    /// Resolution and transform errors are collected until no work is left so
    /// that every broken import is reported at once. A graph invariant
    /// violation stops the build immediately.
    pub async fn build(mut self, seeds: Vec<NodeId>) -> Result<GraphReport, BuildFailure> {
        let start = Instant::now();
        self.pool.reset();

        self.registry
            .report(&ReporterEvent::BuildProgress {
                phase: BuildPhase::Resolving,
                message: None,
            })
            .await;

        for dep_node in seeds {
            if let Err(e) = self.queue_resolve(dep_node) {
                return Err(self.abort(e));
            }
        }

        while self.work_count > 0 {
            let Some(result) = self.receiver.recv().await else {
                break;
            };
            self.work_count -= 1;

            let handled = match result {
                JobResult::Resolved { dep_node, result } => {
                    self.handle_resolved(dep_node, result).await
                }
                JobResult::Transformed {
                    key,
                    request,
                    result,
                } => self.handle_transformed(key, request, result),
                JobResult::Cancelled => Ok(()),
            };

            if let Err(e) = handled {
                return Err(self.abort(e));
            }
        }

        debug!(
            "Asset graph built in {:?}: {} assets, {} dependencies",
            start.elapsed(),
            self.graph.asset_count(),
            self.graph.dependency_count()
        );

        if self.diagnostics.iter().any(Diagnostic::is_fatal) {
            return Err(BuildFailure::new(self.diagnostics));
        }

        self.report.warnings = self.diagnostics;
        info!(
            "Transformed {} file(s), {} from cache",
            self.report.transformed, self.report.cache_hits
        );
        Ok(self.report)
    }

    /// Stop all outstanding work and fail with everything collected so far
    fn abort(mut self, error: BuildError) -> BuildFailure {
        warn!("Cancelling build: {}", error);
        self.pool.cancel();
        self.diagnostics.push(Diagnostic::error(error));
        BuildFailure::new(self.diagnostics)
    }

    fn submit(&mut self, job: Job) -> Result<(), BuildError> {
        self.pool
            .submit(job, self.sender.clone())
            .map_err(|e| BuildError::GraphInvariant(e.to_string()))?;
        self.work_count += 1;
        Ok(())
    }

    fn queue_resolve(&mut self, dep_node: NodeId) -> Result<(), BuildError> {
        let Some(node) = self.graph.dependency(dep_node) else {
            return Err(BuildError::GraphInvariant(format!(
                "Node {} is not a dependency",
                dep_node
            )));
        };
        let dependency = node.dependency.clone();
        self.graph.set_state(dep_node, DependencyState::New);

        self.submit(Job::Resolve {
            dep_node,
            dependency,
        })
    }

    async fn handle_resolved(
        &mut self,
        dep_node: NodeId,
        result: anyhow::Result<Option<std::path::PathBuf>>,
    ) -> Result<(), BuildError> {
        let Some(node) = self.graph.dependency(dep_node) else {
            return Ok(());
        };
        let dependency = node.dependency.clone();

        let from = dependency
            .source_path
            .clone()
            .unwrap_or_else(|| self.options.root.clone());
        let resolution_error = || BuildError::Resolution {
            specifier: dependency.specifier.clone(),
            from: from.clone(),
        };
        let attach = |diagnostic: Diagnostic| {
            let diagnostic = diagnostic.with_dependency(&dependency.id);
            match &dependency.source_asset_id {
                Some(asset_id) => diagnostic.with_asset(asset_id),
                None => diagnostic,
            }
        };

        let path = match result {
            Ok(Some(path)) => clean_path(&path),
            Ok(None) if dependency.is_optional => {
                debug!("Optional dependency '{}' not found", dependency.specifier);
                self.graph.set_state(dep_node, DependencyState::Unresolved);
                self.diagnostics.push(attach(Diagnostic::warning(resolution_error())));
                return Ok(());
            }
            Ok(None) => {
                self.graph.set_state(dep_node, DependencyState::Failed);
                self.diagnostics.push(attach(Diagnostic::error(resolution_error())));
                return Ok(());
            }
            Err(e) => {
                warn!("Resolver failed for '{}': {:#}", dependency.specifier, e);
                self.graph.set_state(dep_node, DependencyState::Failed);
                let diagnostic = if dependency.is_optional {
                    Diagnostic::warning(resolution_error())
                } else {
                    Diagnostic::error(resolution_error())
                };
                self.diagnostics.push(attach(diagnostic));
                return Ok(());
            }
        };

        let key = AssetGraph::request_key(&path, &dependency.env);

        // Already in the graph: link and stop
        if let Some(asset_node) = self.graph.request_node(&key) {
            return self.graph.resolve_dependency(dep_node, asset_node);
        }

        // Being transformed: wait for it
        if let Some(pending) = self.pending.get_mut(&key) {
            pending.waiting.push(dep_node);
            return Ok(());
        }

        // Failed earlier in this pass: share the failure instead of retrying
        if let Some(failed) = self.failed.get_mut(&key) {
            self.graph.set_state(dep_node, DependencyState::Failed);
            if !dependency.is_optional && !failed.reported_fatal {
                failed.reported_fatal = true;
                self.diagnostics
                    .push(attach(Diagnostic::error(failed.error.clone())));
            }
            return Ok(());
        }

        let config_hash = TransformPipeline::config_hash(self.registry, self.options, &path);
        let cache_key = ContentCache::key(&path, &dependency.env, &config_hash);

        self.pending.insert(
            key.clone(),
            PendingRequest {
                cache_key: cache_key.clone(),
                config_hash,
                waiting: vec![dep_node],
            },
        );

        if let Some(entry) = self.cache.get(&cache_key) {
            debug!("Cache hit for {}", path.display());
            let assets = entry.assets.clone();
            self.report.cache_hits += 1;
            return self.insert_assets(&key, assets);
        }

        self.registry
            .report(&ReporterEvent::BuildProgress {
                phase: BuildPhase::Transforming,
                message: Some(path.display().to_string()),
            })
            .await;

        self.submit(Job::Transform {
            key,
            request: TransformRequest {
                file_path: path,
                env: dependency.env.clone(),
                code: None,
            },
        })
    }

    fn handle_transformed(
        &mut self,
        key: String,
        request: TransformRequest,
        result: anyhow::Result<TransformOutcome>,
    ) -> Result<(), BuildError> {
        match result {
            Ok(outcome) => {
                self.report.transformed += 1;
                let assets = outcome.assets.clone();

                if let Some(pending) = self.pending.get(&key) {
                    self.cache.insert(CacheEntry::from_outcome(
                        pending.cache_key.clone(),
                        request.file_path.clone(),
                        request.env.clone(),
                        pending.config_hash.clone(),
                        outcome,
                    ));
                }

                self.insert_assets(&key, assets)
            }
            Err(e) => {
                let error = BuildError::transform(&request.file_path, &e);
                let waiting = self
                    .pending
                    .remove(&key)
                    .map(|p| p.waiting)
                    .unwrap_or_default();

                let all_optional = !waiting.is_empty()
                    && waiting.iter().all(|dep| {
                        self.graph
                            .dependency(*dep)
                            .map(|d| d.dependency.is_optional)
                            .unwrap_or(false)
                    });

                for dep in &waiting {
                    self.graph.set_state(*dep, DependencyState::Failed);
                }

                let trigger = waiting
                    .iter()
                    .filter_map(|dep| self.graph.dependency(*dep))
                    .find(|d| all_optional || !d.dependency.is_optional)
                    .map(|d| d.dependency.id.clone());

                self.failed.insert(
                    key,
                    FailedRequest {
                        error: error.clone(),
                        reported_fatal: !all_optional,
                    },
                );

                let mut diagnostic = if all_optional {
                    Diagnostic::warning(error)
                } else {
                    Diagnostic::error(error)
                };
                if let Some(dependency_id) = trigger {
                    diagnostic = diagnostic.with_dependency(dependency_id);
                }
                self.diagnostics.push(diagnostic);
                Ok(())
            }
        }
    }

    /// Merge a request's assets, link the dependencies waiting on it and
    /// queue resolution of everything the new assets depend on
    fn insert_assets(&mut self, key: &str, assets: Vec<Asset>) -> Result<(), BuildError> {
        let waiting = self
            .pending
            .remove(key)
            .map(|p| p.waiting)
            .unwrap_or_default();

        let inserted = self.graph.add_assets(key, assets)?;

        for dep_node in waiting {
            self.graph.resolve_dependency(dep_node, inserted.primary)?;
        }

        for dep_node in inserted.dependencies {
            self.queue_resolve(dep_node)?;
        }

        Ok(())
    }
}
