//! Asset graph storage
//!
//! Nodes live in an arena addressed by [`NodeId`]; edges are ordered
//! adjacency lists so traversal order follows insertion order. Removed
//! nodes leave a hole, which keeps every other id stable.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use crate::environment::Environment;
use crate::error::BuildError;
use crate::types::{Asset, Dependency, DependencyOptions};
use crate::utils::{clean_path, hash_parts};

pub type NodeId = usize;

/// Meta key marking the dependency that links a child asset to its parent
pub const DISCOVERED_META: &str = "discovered";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Waiting to be resolved
    New,
    Resolved,
    /// Not found; allowed for optional dependencies
    Unresolved,
    /// Resolution or transformation failed
    Failed,
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub dependency: Dependency,
    pub state: DependencyState,
}

#[derive(Debug, Clone)]
pub enum AssetGraphNode {
    Root,
    Dependency(DependencyNode),
    Asset(Asset),
}

/// Everything one transform request added to the graph
#[derive(Debug, Clone, Default)]
pub struct InsertedAssets {
    /// The asset for the file itself
    pub primary: NodeId,
    pub assets: Vec<NodeId>,
    /// Dependency nodes that still need resolving
    pub dependencies: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct AssetGraph {
    nodes: Vec<Option<AssetGraphNode>>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
    assets_by_id: HashMap<String, NodeId>,
    dependencies_by_id: HashMap<String, NodeId>,
    /// Asset nodes created by each transform request, primary first
    requests: HashMap<String, Vec<NodeId>>,
    root: NodeId,
}

impl Default for AssetGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(AssetGraphNode::Root)],
            outgoing: vec![Vec::new()],
            incoming: vec![Vec::new()],
            assets_by_id: HashMap::new(),
            dependencies_by_id: HashMap::new(),
            requests: HashMap::new(),
            root: 0,
        }
    }

    /// Memoization key for transforming one file in one environment
    pub fn request_key(file_path: &Path, env: &Environment) -> String {
        let file_path = clean_path(file_path);
        hash_parts([file_path.to_string_lossy().as_ref(), env.id().as_str()])
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&AssetGraphNode> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn asset(&self, id: NodeId) -> Option<&Asset> {
        match self.node(id)? {
            AssetGraphNode::Asset(asset) => Some(asset),
            _ => None,
        }
    }

    pub fn dependency(&self, id: NodeId) -> Option<&DependencyNode> {
        match self.node(id)? {
            AssetGraphNode::Dependency(node) => Some(node),
            _ => None,
        }
    }

    pub fn asset_node(&self, asset_id: &str) -> Option<NodeId> {
        self.assets_by_id.get(asset_id).copied()
    }

    pub fn asset_by_id(&self, asset_id: &str) -> Option<&Asset> {
        self.asset(self.asset_node(asset_id)?)
    }

    pub fn dependency_node(&self, dependency_id: &str) -> Option<NodeId> {
        self.dependencies_by_id.get(dependency_id).copied()
    }

    /// Primary asset node already produced for a transform request
    pub fn request_node(&self, key: &str) -> Option<NodeId> {
        self.requests.get(key).and_then(|nodes| nodes.first()).copied()
    }

    pub fn asset_nodes(&self) -> impl Iterator<Item = (NodeId, &Asset)> {
        self.nodes.iter().enumerate().filter_map(|(id, node)| match node {
            Some(AssetGraphNode::Asset(asset)) => Some((id, asset)),
            _ => None,
        })
    }

    pub fn dependency_nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes.iter().enumerate().filter_map(|(id, node)| match node {
            Some(AssetGraphNode::Dependency(dep)) => Some((id, dep)),
            _ => None,
        })
    }

    pub fn asset_count(&self) -> usize {
        self.assets_by_id.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies_by_id.len()
    }

    /// Entry dependencies, in insertion order
    pub fn entry_dependencies(&self) -> &[NodeId] {
        &self.outgoing[self.root]
    }

    pub fn outgoing(&self, id: NodeId) -> &[NodeId] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: NodeId) -> &[NodeId] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push_node(&mut self, node: AssetGraphNode) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.outgoing[from].contains(&to) {
            self.outgoing[from].push(to);
            self.incoming[to].push(from);
        }
    }

    fn remove_edge(&mut self, from: NodeId, to: NodeId) {
        self.outgoing[from].retain(|n| *n != to);
        self.incoming[to].retain(|n| *n != from);
    }

    /// Add a dependency node under `parent`, reusing an existing node
    fn add_dependency_node(&mut self, parent: NodeId, dependency: Dependency) -> (NodeId, bool) {
        if let Some(existing) = self.dependency_node(&dependency.id) {
            self.add_edge(parent, existing);
            return (existing, false);
        }

        let id = dependency.id.clone();
        let node = self.push_node(AssetGraphNode::Dependency(DependencyNode {
            dependency,
            state: DependencyState::New,
        }));
        self.dependencies_by_id.insert(id, node);
        self.add_edge(parent, node);
        (node, true)
    }

    pub fn add_entry_dependency(&mut self, dependency: Dependency) -> NodeId {
        self.add_dependency_node(self.root, dependency).0
    }

    /// Insert the assets one transform request produced.
    ///
    /// The first asset represents the file; every other asset is linked to it
    /// through a synchronous dependency marked as discovered.
    pub fn add_assets(&mut self, key: &str, assets: Vec<Asset>) -> Result<InsertedAssets, BuildError> {
        if assets.is_empty() {
            return Err(BuildError::GraphInvariant(format!(
                "Transform request {} produced no assets",
                key
            )));
        }
        if self.requests.contains_key(key) {
            return Err(BuildError::GraphInvariant(format!(
                "Transform request {} was inserted twice",
                key
            )));
        }

        let mut inserted = InsertedAssets::default();

        for asset in assets {
            if self.assets_by_id.contains_key(&asset.id) {
                return Err(BuildError::GraphInvariant(format!(
                    "Asset {} ({}) already exists",
                    asset.id,
                    asset.file_path.display()
                )));
            }

            let asset_id = asset.id.clone();
            let dependencies = asset.dependencies.clone();
            let node = self.push_node(AssetGraphNode::Asset(asset));
            self.assets_by_id.insert(asset_id, node);
            inserted.assets.push(node);

            for dependency in dependencies {
                let (dep_node, created) = self.add_dependency_node(node, dependency);
                if created {
                    inserted.dependencies.push(dep_node);
                }
            }
        }

        inserted.primary = inserted.assets[0];

        // Link children to the primary asset
        let children: Vec<NodeId> = inserted.assets[1..].to_vec();
        for child in children {
            let (dependency, primary) = {
                let (Some(primary), Some(child)) = (self.asset(inserted.primary), self.asset(child))
                else {
                    continue;
                };
                let key = child
                    .unique_key
                    .clone()
                    .unwrap_or_else(|| child.id.clone());
                let options = DependencyOptions::new(key)
                    .with_meta(DISCOVERED_META, serde_json::Value::Bool(true));
                (
                    Dependency::from_options(
                        options,
                        &primary.id,
                        primary.file_path.clone(),
                        &primary.env,
                    ),
                    inserted.primary,
                )
            };
            let (dep_node, _) = self.add_dependency_node(primary, dependency);
            self.resolve_dependency(dep_node, child)?;
        }

        self.requests.insert(key.to_string(), inserted.assets.clone());
        Ok(inserted)
    }

    /// Point a dependency at the asset it resolved to.
    ///
    /// A dependency resolves to at most one asset.
    pub fn resolve_dependency(&mut self, dep_node: NodeId, asset_node: NodeId) -> Result<(), BuildError> {
        if self.asset(asset_node).is_none() {
            return Err(BuildError::GraphInvariant(format!(
                "Node {} is not an asset",
                asset_node
            )));
        }

        match self.resolved_asset(dep_node) {
            Some(existing) if existing == asset_node => {}
            Some(existing) => {
                let specifier = self
                    .dependency(dep_node)
                    .map(|d| d.dependency.specifier.clone())
                    .unwrap_or_default();
                return Err(BuildError::GraphInvariant(format!(
                    "Dependency '{}' already resolves to node {}, cannot resolve to {}",
                    specifier, existing, asset_node
                )));
            }
            None => self.add_edge(dep_node, asset_node),
        }

        self.set_state(dep_node, DependencyState::Resolved);
        Ok(())
    }

    pub fn set_state(&mut self, dep_node: NodeId, state: DependencyState) {
        if let Some(Some(AssetGraphNode::Dependency(node))) = self.nodes.get_mut(dep_node) {
            node.state = state;
        }
    }

    /// The asset a dependency resolved to
    pub fn resolved_asset(&self, dep_node: NodeId) -> Option<NodeId> {
        self.dependency(dep_node)?;
        self.outgoing(dep_node)
            .iter()
            .copied()
            .find(|n| self.asset(*n).is_some())
    }

    pub fn resolved_asset_for(&self, dependency_id: &str) -> Option<&Asset> {
        self.asset(self.resolved_asset(self.dependency_node(dependency_id)?)?)
    }

    /// Dependency nodes emitted by an asset, in emission order
    pub fn dependencies_of(&self, asset_node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing(asset_node)
            .iter()
            .copied()
            .filter(move |n| self.dependency(*n).is_some())
    }

    /// Child assets linked to an asset through discovered dependencies
    pub fn children_of(&self, asset_node: NodeId) -> Vec<NodeId> {
        self.dependencies_of(asset_node)
            .filter(|dep| {
                self.dependency(*dep)
                    .map(|d| d.dependency.meta.contains_key(DISCOVERED_META))
                    .unwrap_or(false)
            })
            .filter_map(|dep| self.resolved_asset(dep))
            .collect()
    }

    /// Dependencies that are not resolved yet or failed last time
    pub fn pending_dependencies(&self) -> Vec<NodeId> {
        self.dependency_nodes()
            .filter(|(_, node)| node.state != DependencyState::Resolved)
            .map(|(id, _)| id)
            .collect()
    }

    /// Remove every transform request whose assets depend on `path`.
    ///
    /// Returns the dependencies that pointed at the removed assets; they are
    /// reset to [`DependencyState::New`].
    pub fn invalidate_file(&mut self, path: &Path) -> Vec<NodeId> {
        let path = clean_path(path);
        let mut keys: Vec<String> = self
            .requests
            .iter()
            .filter(|(_, nodes)| {
                nodes.iter().any(|n| {
                    self.asset(*n)
                        .map(|a| {
                            clean_path(&a.file_path) == path
                                || a.connected_files.iter().any(|f| clean_path(&f.path) == path)
                        })
                        .unwrap_or(false)
                })
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        let mut reseed = Vec::new();
        for key in keys {
            for dep in self.remove_request(&key) {
                if !reseed.contains(&dep) {
                    reseed.push(dep);
                }
            }
        }
        reseed
    }

    /// Remove the assets of one request together with the dependencies they
    /// emitted; returns the outside dependencies that pointed at them
    pub fn remove_request(&mut self, key: &str) -> Vec<NodeId> {
        let Some(asset_nodes) = self.requests.remove(key) else {
            return Vec::new();
        };

        let mut owned_dependencies = Vec::new();
        for asset in &asset_nodes {
            owned_dependencies.extend(self.dependencies_of(*asset));
        }

        let mut reseed = Vec::new();
        for asset in &asset_nodes {
            for dep in self.incoming(*asset).to_vec() {
                if owned_dependencies.contains(&dep) {
                    continue;
                }
                self.remove_edge(dep, *asset);
                self.set_state(dep, DependencyState::New);
                reseed.push(dep);
            }
        }

        for dep in owned_dependencies {
            self.remove_node(dep);
        }
        for asset in asset_nodes {
            self.remove_node(asset);
        }

        reseed
    }

    fn remove_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id).and_then(Option::take) else {
            return;
        };

        match node {
            AssetGraphNode::Asset(asset) => {
                self.assets_by_id.remove(&asset.id);
            }
            AssetGraphNode::Dependency(dep) => {
                self.dependencies_by_id.remove(&dep.dependency.id);
            }
            AssetGraphNode::Root => {}
        }

        for to in std::mem::take(&mut self.outgoing[id]) {
            self.incoming[to].retain(|n| *n != id);
        }
        for from in std::mem::take(&mut self.incoming[id]) {
            self.outgoing[from].retain(|n| *n != id);
        }
    }

    /// Drop every node that can no longer be reached from the root
    pub fn prune_unreachable(&mut self) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([self.root]);
        reachable[self.root] = true;

        while let Some(id) = queue.pop_front() {
            for &next in &self.outgoing[id] {
                if !reachable[next] {
                    reachable[next] = true;
                    queue.push_back(next);
                }
            }
        }

        let unreachable: Vec<NodeId> = (0..self.nodes.len())
            .filter(|id| !reachable[*id] && self.nodes[*id].is_some())
            .collect();

        self.requests.retain(|_, nodes| nodes.first().map(|n| reachable[*n]).unwrap_or(false));
        for id in &unreachable {
            self.remove_node(*id);
        }

        unreachable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Target;
    use crate::types::{AssetDraft, Code};
    use std::path::PathBuf;

    fn target() -> Target {
        Target {
            name: "default".into(),
            dist_dir: PathBuf::from("/dist"),
            env: Environment::default(),
        }
    }

    fn asset(path: &str, deps: &[&str]) -> Asset {
        let mut asset = Asset::new(path, Environment::default(), Code::from(""));
        for dep in deps {
            asset.add_dependency(DependencyOptions::new(*dep));
        }
        asset
    }

    fn key(path: &str) -> String {
        AssetGraph::request_key(Path::new(path), &Environment::default())
    }

    #[test]
    fn test_add_assets_links_children_through_discovered_dependencies() {
        let mut graph = AssetGraph::new();
        let parent = asset("/src/a.module.css", &["./b.css"]);
        let child = parent.create_child(AssetDraft::new("js", "module.exports = {};"), 0);

        let inserted = graph.add_assets(&key("/src/a.module.css"), vec![parent, child]).unwrap();

        assert_eq!(inserted.assets.len(), 2);
        assert_eq!(inserted.dependencies.len(), 1);
        assert_eq!(graph.children_of(inserted.primary), vec![inserted.assets[1]]);
        assert_eq!(graph.dependencies_of(inserted.primary).count(), 2);
    }

    #[test]
    fn test_dependency_resolves_once() {
        let mut graph = AssetGraph::new();
        let entry = graph.add_entry_dependency(Dependency::entry("src/index.js", target()));
        let a = graph.add_assets(&key("/src/a.js"), vec![asset("/src/a.js", &[])]).unwrap();
        let b = graph.add_assets(&key("/src/b.js"), vec![asset("/src/b.js", &[])]).unwrap();

        graph.resolve_dependency(entry, a.primary).unwrap();
        graph.resolve_dependency(entry, a.primary).unwrap();
        assert!(matches!(
            graph.resolve_dependency(entry, b.primary),
            Err(BuildError::GraphInvariant(_))
        ));
        assert_eq!(graph.resolved_asset(entry), Some(a.primary));
    }

    #[test]
    fn test_invalidate_and_prune() {
        let mut graph = AssetGraph::new();
        let entry = graph.add_entry_dependency(Dependency::entry("src/index.js", target()));
        let index = graph
            .add_assets(&key("/src/index.js"), vec![asset("/src/index.js", &["./a"])])
            .unwrap();
        graph.resolve_dependency(entry, index.primary).unwrap();

        let a = graph.add_assets(&key("/src/a.js"), vec![asset("/src/a.js", &[])]).unwrap();
        graph.resolve_dependency(index.dependencies[0], a.primary).unwrap();
        assert_eq!(graph.asset_count(), 2);

        // Changing index.js drops it and its dependency; a.js is left dangling
        let reseed = graph.invalidate_file(Path::new("/src/index.js"));
        assert_eq!(reseed, vec![entry]);
        assert_eq!(graph.dependency(entry).unwrap().state, DependencyState::New);
        assert_eq!(graph.asset_count(), 1);

        assert_eq!(graph.prune_unreachable(), 1);
        assert_eq!(graph.asset_count(), 0);
        assert!(graph.request_node(&key("/src/a.js")).is_none());
        assert_eq!(graph.pending_dependencies(), vec![entry]);
    }

    #[test]
    fn test_dotted_paths_name_the_same_request() {
        assert_eq!(key("/src/./sub/../a.js"), key("/src/a.js"));

        let mut graph = AssetGraph::new();
        let entry = graph.add_entry_dependency(Dependency::entry("src/a.js", target()));
        let a = graph.add_assets(&key("/src/a.js"), vec![asset("/src/a.js", &[])]).unwrap();
        graph.resolve_dependency(entry, a.primary).unwrap();

        let reseed = graph.invalidate_file(Path::new("/src/sub/../a.js"));
        assert_eq!(reseed, vec![entry]);
        assert_eq!(graph.asset_count(), 0);
    }
}
