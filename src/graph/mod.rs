//! The asset graph and its construction

mod asset_graph;
mod builder;

pub use asset_graph::{
    AssetGraph, AssetGraphNode, DependencyNode, DependencyState, InsertedAssets, NodeId,
    DISCOVERED_META,
};
pub use builder::{AssetGraphBuilder, GraphReport};
