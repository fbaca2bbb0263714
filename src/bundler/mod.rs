//! Bundling: partition the asset graph into bundles and bundle groups

mod bundle_graph;
mod default_bundler;

use anyhow::Result;

use crate::config::BuildOptions;
use crate::graph::AssetGraph;

pub use bundle_graph::{
    Bundle, BundleGraph, BundleGroup, BundleGroupId, BundleOptions, BundleStats, LoadKind,
};
pub use default_bundler::DefaultBundler;

/// Bundler plugin contract.
///
/// A bundler only mutates the bundle graph through its graph operations:
/// [`BundleGraph::add_bundle_group`], [`BundleGraph::add_bundle`],
/// [`BundleGraph::add_asset_to_bundle`], [`BundleGraph::merge_bundles`] and
/// [`BundleGraph::remove_asset`].
pub trait Bundler: Send + Sync {
    fn name(&self) -> &str;

    fn bundle(
        &self,
        asset_graph: &AssetGraph,
        bundle_graph: &mut BundleGraph,
        options: &BuildOptions,
    ) -> Result<()>;
}
