//! Bundles, bundle groups and the queries later phases run over them
//!
//! Bundles are stored in creation order and addressed by a stable id
//! derived from their group's entry asset, type and environment. Groups are
//! addressed by index. Runtime assets synthesized after bundling live here
//! rather than in the asset graph so a rebuild never sees them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::environment::{Environment, Target};
use crate::error::BuildError;
use crate::graph::AssetGraph;
use crate::types::Asset;
use crate::utils::hash_parts;

pub type BundleGroupId = usize;

/// How the bundles of a group reach the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    /// Loaded by the page directly
    Entry,
    /// Loaded at runtime when a dynamic import runs
    Lazy,
    /// Emitted and referenced by URL; never executed by the runtime
    Referenced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BundleStats {
    pub size: usize,
    pub time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: String,
    pub bundle_type: String,
    pub env: Environment,
    pub target: Target,

    /// Group entry assets contained in this bundle
    pub entry_asset_ids: Vec<String>,

    /// The asset executed when an entry bundle loads
    pub main_entry: Option<String>,

    /// Asset ids in output order
    pub assets: Vec<String>,

    pub is_entry: bool,
    pub load: LoadKind,

    /// Output file name, set by the namer
    pub name: Option<String>,
    pub file_path: Option<PathBuf>,

    pub stats: BundleStats,
}

impl Bundle {
    pub fn contains(&self, asset_id: &str) -> bool {
        self.assets.iter().any(|a| a == asset_id)
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("{}.{}", self.id, self.bundle_type))
    }
}

/// What to create when a group needs a bundle of a new type
#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub bundle_type: String,
    pub env: Environment,
}

/// The bundles that must load together to satisfy one dependency
#[derive(Debug, Clone)]
pub struct BundleGroup {
    pub id: BundleGroupId,

    /// The dependency that first created the group
    pub dependency_id: String,
    pub target: Target,
    pub entry_asset_id: String,
    pub kind: LoadKind,

    /// Bundle ids, one per output type
    pub bundles: Vec<String>,

    /// Groups whose bundles reference this one
    pub parents: Vec<BundleGroupId>,
}

#[derive(Debug, Clone)]
pub struct BundleGraph {
    asset_graph: Arc<AssetGraph>,
    bundles: Vec<Option<Bundle>>,
    bundle_index: HashMap<String, usize>,
    groups: Vec<BundleGroup>,
    groups_by_key: HashMap<(String, String, LoadKind), BundleGroupId>,
    groups_by_dependency: HashMap<String, BundleGroupId>,

    runtime_assets: HashMap<String, Asset>,
    /// Dependency id of a runtime asset to the asset it loads
    runtime_links: HashMap<String, String>,
    /// Async dependency id to the runtime asset standing in for it
    dependency_runtimes: HashMap<String, String>,
}

impl BundleGraph {
    pub fn new(asset_graph: Arc<AssetGraph>) -> Self {
        Self {
            asset_graph,
            bundles: Vec::new(),
            bundle_index: HashMap::new(),
            groups: Vec::new(),
            groups_by_key: HashMap::new(),
            groups_by_dependency: HashMap::new(),
            runtime_assets: HashMap::new(),
            runtime_links: HashMap::new(),
            dependency_runtimes: HashMap::new(),
        }
    }

    pub fn asset_graph(&self) -> &AssetGraph {
        &self.asset_graph
    }

    /// Create the group for `dependency_id`, or reuse the group already
    /// loading the same asset for the same target.
    pub fn add_bundle_group(
        &mut self,
        dependency_id: &str,
        target: &Target,
        entry_asset_id: &str,
        kind: LoadKind,
        parent: Option<BundleGroupId>,
    ) -> BundleGroupId {
        let key = (entry_asset_id.to_string(), target.name.clone(), kind);

        let id = match self.groups_by_key.get(&key) {
            Some(id) => *id,
            None => {
                let id = self.groups.len();
                self.groups.push(BundleGroup {
                    id,
                    dependency_id: dependency_id.to_string(),
                    target: target.clone(),
                    entry_asset_id: entry_asset_id.to_string(),
                    kind,
                    bundles: Vec::new(),
                    parents: Vec::new(),
                });
                self.groups_by_key.insert(key, id);
                id
            }
        };

        if let Some(parent) = parent {
            let group = &mut self.groups[id];
            if parent != id && !group.parents.contains(&parent) {
                group.parents.push(parent);
            }
        }
        self.groups_by_dependency
            .entry(dependency_id.to_string())
            .or_insert(id);

        id
    }

    /// Get or create the group's bundle for a type and environment
    pub fn add_bundle(&mut self, group: BundleGroupId, options: BundleOptions) -> Result<String, BuildError> {
        let Some(bundle_group) = self.groups.get(group) else {
            return Err(BuildError::GraphInvariant(format!("No bundle group {}", group)));
        };

        let id = hash_parts([
            bundle_group.entry_asset_id.as_str(),
            bundle_group.target.name.as_str(),
            format!("{:?}", bundle_group.kind).as_str(),
            options.bundle_type.as_str(),
            options.env.id().as_str(),
        ]);

        if !self.bundle_index.contains_key(&id) {
            let bundle = Bundle {
                id: id.clone(),
                bundle_type: options.bundle_type,
                env: options.env,
                target: bundle_group.target.clone(),
                entry_asset_ids: Vec::new(),
                main_entry: None,
                assets: Vec::new(),
                is_entry: bundle_group.kind == LoadKind::Entry,
                load: bundle_group.kind,
                name: None,
                file_path: None,
                stats: BundleStats::default(),
            };
            self.bundle_index.insert(id.clone(), self.bundles.len());
            self.bundles.push(Some(bundle));
        }

        let bundle_group = &mut self.groups[group];
        if !bundle_group.bundles.contains(&id) {
            bundle_group.bundles.push(id.clone());
        }

        Ok(id)
    }

    /// Append an asset to a bundle; an asset appears in a bundle at most once
    pub fn add_asset_to_bundle(&mut self, bundle_id: &str, asset_id: &str) -> Result<(), BuildError> {
        let asset = self
            .asset(asset_id)
            .ok_or_else(|| BuildError::GraphInvariant(format!("Unknown asset {}", asset_id)))?;
        let size = asset.stats.size;
        let time_ms = asset.stats.time_ms;

        let entry_of_group = self
            .groups
            .iter()
            .any(|g| g.entry_asset_id == asset_id && g.bundles.iter().any(|b| b == bundle_id));

        let bundle = self.bundle_mut(bundle_id)?;
        if bundle.contains(asset_id) {
            return Ok(());
        }

        bundle.assets.push(asset_id.to_string());
        bundle.stats.size += size;
        bundle.stats.time_ms += time_ms;
        if entry_of_group && !bundle.entry_asset_ids.iter().any(|a| a == asset_id) {
            bundle.entry_asset_ids.push(asset_id.to_string());
            if bundle.main_entry.is_none() {
                bundle.main_entry = Some(asset_id.to_string());
            }
        }
        Ok(())
    }

    pub fn remove_asset(&mut self, bundle_id: &str, asset_id: &str) -> Result<(), BuildError> {
        let size = self.asset(asset_id).map(|a| a.stats.size).unwrap_or(0);
        let bundle = self.bundle_mut(bundle_id)?;

        if let Some(index) = bundle.assets.iter().position(|a| a == asset_id) {
            bundle.assets.remove(index);
            bundle.stats.size = bundle.stats.size.saturating_sub(size);
            bundle.entry_asset_ids.retain(|a| a != asset_id);
            if bundle.main_entry.as_deref() == Some(asset_id) {
                bundle.main_entry = bundle.entry_asset_ids.first().cloned();
            }
        }
        Ok(())
    }

    /// Move every asset of `from` into `into` and drop `from`.
    ///
    /// Both bundles must have the same type and environment.
    pub fn merge_bundles(&mut self, into: &str, from: &str) -> Result<(), BuildError> {
        if into == from {
            return Ok(());
        }
        let source = self.bundle(from).cloned().ok_or_else(|| missing_bundle(from))?;
        {
            let target = self.bundle(into).ok_or_else(|| missing_bundle(into))?;
            if target.bundle_type != source.bundle_type || target.env != source.env {
                return Err(BuildError::GraphInvariant(format!(
                    "Cannot merge {} bundle {} into {} bundle {}",
                    source.bundle_type, from, target.bundle_type, into
                )));
            }
        }

        let target = self.bundle_mut(into)?;
        for asset_id in &source.assets {
            if !target.contains(asset_id) {
                target.assets.push(asset_id.clone());
            }
        }
        for entry in &source.entry_asset_ids {
            if !target.entry_asset_ids.contains(entry) {
                target.entry_asset_ids.push(entry.clone());
            }
        }
        if target.main_entry.is_none() {
            target.main_entry = source.main_entry.clone();
        }
        target.is_entry |= source.is_entry;
        target.stats.size += source.stats.size;
        target.stats.time_ms += source.stats.time_ms;

        for group in &mut self.groups {
            if let Some(index) = group.bundles.iter().position(|b| b == from) {
                if group.bundles.iter().any(|b| b == into) {
                    group.bundles.remove(index);
                } else {
                    group.bundles[index] = into.to_string();
                }
            }
        }

        if let Some(index) = self.bundle_index.remove(from) {
            self.bundles[index] = None;
        }
        Ok(())
    }

    pub fn bundle(&self, id: &str) -> Option<&Bundle> {
        self.bundles[*self.bundle_index.get(id)?].as_ref()
    }

    pub fn bundle_mut(&mut self, id: &str) -> Result<&mut Bundle, BuildError> {
        let index = *self.bundle_index.get(id).ok_or_else(|| missing_bundle(id))?;
        self.bundles[index].as_mut().ok_or_else(|| missing_bundle(id))
    }

    /// Every bundle, in creation order
    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.iter().flatten()
    }

    pub fn bundle_count(&self) -> usize {
        self.bundle_index.len()
    }

    pub fn groups(&self) -> &[BundleGroup] {
        &self.groups
    }

    pub fn group(&self, id: BundleGroupId) -> Option<&BundleGroup> {
        self.groups.get(id)
    }

    /// The group a dependency loads, if it starts one
    pub fn bundle_group_for_dependency(&self, dependency_id: &str) -> Option<&BundleGroup> {
        if let Some(id) = self.groups_by_dependency.get(dependency_id) {
            return self.groups.get(*id);
        }

        // A dependency that reuses an existing group is only recorded by
        // the asset it resolves to
        let node = self.asset_graph.dependency_node(dependency_id)?;
        let dependency = &self.asset_graph.dependency(node)?.dependency;
        let asset = self.asset_graph.asset(self.asset_graph.resolved_asset(node)?)?;
        self.groups.iter().find(|g| {
            g.entry_asset_id == asset.id
                && g.kind != LoadKind::Entry
                && (dependency.is_url == (g.kind == LoadKind::Referenced))
        })
    }

    pub fn find_bundles_with_asset(&self, asset_id: &str) -> Vec<&Bundle> {
        self.bundles().filter(|b| b.contains(asset_id)).collect()
    }

    pub fn bundle_groups_of(&self, bundle_id: &str) -> Vec<&BundleGroup> {
        self.groups
            .iter()
            .filter(|g| g.bundles.iter().any(|b| b == bundle_id))
            .collect()
    }

    pub fn bundles_in_group(&self, group: BundleGroupId) -> Vec<&Bundle> {
        self.groups
            .get(group)
            .map(|g| g.bundles.iter().filter_map(|id| self.bundle(id)).collect())
            .unwrap_or_default()
    }

    /// Whether every load path to `bundle_id` passes through a bundle that
    /// already ships `asset_id`
    pub fn is_asset_in_ancestor_bundle(&self, bundle_id: &str, asset_id: &str) -> bool {
        let groups = self.bundle_groups_of(bundle_id);
        !groups.is_empty()
            && groups
                .iter()
                .all(|g| self.provided_by_parents(g.id, asset_id, &mut HashSet::new()))
    }

    fn provided_by_parents(
        &self,
        group: BundleGroupId,
        asset_id: &str,
        visited: &mut HashSet<BundleGroupId>,
    ) -> bool {
        if !visited.insert(group) {
            return false;
        }
        let parents = &self.groups[group].parents;
        !parents.is_empty()
            && parents.iter().all(|parent| {
                self.bundles_in_group(*parent).iter().any(|b| b.contains(asset_id))
                    || self.provided_by_parents(*parent, asset_id, visited)
            })
    }

    /// Bundle ids, entry groups first, then groups in load order
    pub fn traverse_bundles(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen_groups = HashSet::new();
        let mut stack: Vec<BundleGroupId> = self
            .groups
            .iter()
            .filter(|g| g.kind == LoadKind::Entry)
            .map(|g| g.id)
            .rev()
            .collect();

        while let Some(group) = stack.pop() {
            if !seen_groups.insert(group) {
                continue;
            }
            for bundle in &self.groups[group].bundles {
                if !order.contains(bundle) {
                    order.push(bundle.clone());
                }
            }
            let children: Vec<BundleGroupId> = self
                .groups
                .iter()
                .filter(|g| g.parents.contains(&group))
                .map(|g| g.id)
                .collect();
            stack.extend(children.into_iter().rev());
        }

        // Bundles of unreachable groups still get emitted
        for bundle in self.bundles() {
            if !order.contains(&bundle.id) {
                order.push(bundle.id.clone());
            }
        }
        order
    }

    pub fn entry_assets(&self, bundle_id: &str) -> Vec<&Asset> {
        self.bundle(bundle_id)
            .map(|b| b.entry_asset_ids.iter().filter_map(|id| self.asset(id)).collect())
            .unwrap_or_default()
    }

    /// Sum of the output sizes of a bundle's assets
    pub fn total_size(&self, bundle_id: &str) -> usize {
        self.bundle(bundle_id)
            .map(|b| b.assets.iter().filter_map(|id| self.asset(id)).map(|a| a.stats.size).sum())
            .unwrap_or(0)
    }

    /// Look up an asset, runtime assets included
    pub fn asset(&self, asset_id: &str) -> Option<&Asset> {
        self.runtime_assets
            .get(asset_id)
            .or_else(|| self.asset_graph.asset_by_id(asset_id))
    }

    pub fn is_runtime_asset(&self, asset_id: &str) -> bool {
        self.runtime_assets.contains_key(asset_id)
    }

    /// The asset a dependency resolved to, runtime assets included
    pub fn resolve_dependency(&self, dependency_id: &str) -> Option<&Asset> {
        match self.runtime_links.get(dependency_id) {
            Some(asset_id) => self.asset(asset_id),
            None => self.asset_graph.resolved_asset_for(dependency_id),
        }
    }

    /// Add a synthesized asset to a bundle
    pub fn add_runtime_asset(
        &mut self,
        bundle_id: &str,
        asset: Asset,
        links: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), BuildError> {
        let asset_id = asset.id.clone();
        self.runtime_links.extend(links);
        self.runtime_assets.entry(asset_id.clone()).or_insert(asset);
        self.add_asset_to_bundle(bundle_id, &asset_id)
    }

    /// Route an async dependency through the runtime asset that loads its group
    pub fn set_dependency_runtime(&mut self, dependency_id: &str, runtime_asset_id: &str) {
        self.dependency_runtimes
            .insert(dependency_id.to_string(), runtime_asset_id.to_string());
    }

    pub fn dependency_runtime(&self, dependency_id: &str) -> Option<&Asset> {
        self.asset(self.dependency_runtimes.get(dependency_id)?)
    }

    pub fn set_name(&mut self, bundle_id: &str, name: String) -> Result<(), BuildError> {
        let bundle = self.bundle_mut(bundle_id)?;
        bundle.file_path = Some(bundle.target.dist_dir.join(&name));
        bundle.name = Some(name);
        Ok(())
    }
}

fn missing_bundle(id: &str) -> BuildError {
    BuildError::GraphInvariant(format!("No bundle {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AssetGraph;
    use crate::types::{Code, Dependency};
    use std::path::Path;

    fn target() -> Target {
        Target {
            name: "default".into(),
            dist_dir: PathBuf::from("/dist"),
            env: Environment::default(),
        }
    }

    fn graph_with(paths: &[&str]) -> (Arc<AssetGraph>, Vec<String>) {
        let mut graph = AssetGraph::new();
        let mut ids = Vec::new();
        for path in paths {
            let mut asset = Asset::new(*path, Environment::default(), Code::from("x"));
            asset.finalize(None);
            ids.push(asset.id.clone());
            graph
                .add_assets(&AssetGraph::request_key(Path::new(path), &asset.env), vec![asset])
                .unwrap();
        }
        graph.add_entry_dependency(Dependency::entry("/src/a.js", target()));
        (Arc::new(graph), ids)
    }

    fn js() -> BundleOptions {
        BundleOptions {
            bundle_type: "js".into(),
            env: Environment::default(),
        }
    }

    #[test]
    fn test_groups_are_shared_by_entry_asset() {
        let (graph, ids) = graph_with(&["/src/a.js", "/src/b.js"]);
        let mut bundles = BundleGraph::new(graph);

        let entry = bundles.add_bundle_group("dep-entry", &target(), &ids[0], LoadKind::Entry, None);
        let lazy = bundles.add_bundle_group("dep-1", &target(), &ids[1], LoadKind::Lazy, Some(entry));
        let again = bundles.add_bundle_group("dep-2", &target(), &ids[1], LoadKind::Lazy, Some(entry));

        assert_eq!(lazy, again);
        assert_eq!(bundles.group(lazy).unwrap().parents, vec![entry]);
        assert_eq!(bundles.bundle_group_for_dependency("dep-2").unwrap().id, lazy);
    }

    #[test]
    fn test_ancestor_query_follows_every_parent() {
        let (graph, ids) = graph_with(&["/src/a.js", "/src/b.js", "/src/shared.js"]);
        let mut bundles = BundleGraph::new(graph);

        let entry = bundles.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
        let lazy = bundles.add_bundle_group("d1", &target(), &ids[1], LoadKind::Lazy, Some(entry));
        let entry_bundle = bundles.add_bundle(entry, js()).unwrap();
        let lazy_bundle = bundles.add_bundle(lazy, js()).unwrap();

        bundles.add_asset_to_bundle(&entry_bundle, &ids[0]).unwrap();
        bundles.add_asset_to_bundle(&lazy_bundle, &ids[1]).unwrap();
        assert!(!bundles.is_asset_in_ancestor_bundle(&lazy_bundle, &ids[2]));

        bundles.add_asset_to_bundle(&entry_bundle, &ids[2]).unwrap();
        assert!(bundles.is_asset_in_ancestor_bundle(&lazy_bundle, &ids[2]));
        assert!(!bundles.is_asset_in_ancestor_bundle(&entry_bundle, &ids[2]));

        assert_eq!(bundles.bundle(&entry_bundle).unwrap().main_entry.as_deref(), Some(ids[0].as_str()));
        assert_eq!(bundles.find_bundles_with_asset(&ids[2]).len(), 1);
        assert_eq!(bundles.traverse_bundles(), vec![entry_bundle, lazy_bundle]);
    }

    #[test]
    fn test_merge_and_remove() {
        let (graph, ids) = graph_with(&["/src/a.js", "/src/b.js"]);
        let mut bundles = BundleGraph::new(graph);

        let first = bundles.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
        let second = bundles.add_bundle_group("d1", &target(), &ids[1], LoadKind::Lazy, Some(first));
        let a = bundles.add_bundle(first, js()).unwrap();
        let b = bundles.add_bundle(second, js()).unwrap();
        bundles.add_asset_to_bundle(&a, &ids[0]).unwrap();
        bundles.add_asset_to_bundle(&b, &ids[1]).unwrap();

        bundles.merge_bundles(&a, &b).unwrap();
        assert_eq!(bundles.bundle_count(), 1);
        assert_eq!(bundles.bundle(&a).unwrap().assets, vec![ids[0].clone(), ids[1].clone()]);
        assert_eq!(bundles.bundles_in_group(second)[0].id, a);
        assert_eq!(bundles.total_size(&a), 2);

        bundles.remove_asset(&a, &ids[1]).unwrap();
        assert_eq!(bundles.bundle(&a).unwrap().assets, vec![ids[0].clone()]);
    }
}
