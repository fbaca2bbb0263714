use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::config::BuildOptions;
use crate::environment::Target;
use crate::graph::{AssetGraph, NodeId, DISCOVERED_META};

use super::{BundleGraph, BundleGroupId, BundleOptions, Bundler, LoadKind};

/// Splits the asset graph at async and URL dependencies.
///
/// Each entry, dynamic import target and URL reference gets a bundle group;
/// inside a group, assets reached over synchronous edges are split by type
/// into one bundle each. An asset needed by several groups goes into the
/// closest group every one of them loads through, or is duplicated when no
/// such group exists.
#[derive(Debug, Default)]
pub struct DefaultBundler;

impl DefaultBundler {
    pub fn new() -> Self {
        Self
    }
}

/// Assets reached from a group entry plus the dependencies that start new groups
struct Reach {
    assets: Vec<NodeId>,
    members: HashSet<NodeId>,
    boundaries: Vec<(NodeId, LoadKind)>,
}

impl Bundler for DefaultBundler {
    fn name(&self) -> &str {
        "default"
    }

    fn bundle(
        &self,
        graph: &AssetGraph,
        bundle_graph: &mut BundleGraph,
        options: &BuildOptions,
    ) -> Result<()> {
        let default_target = options
            .targets
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("No build target configured"))?;

        for &dep_node in graph.entry_dependencies() {
            let (Some(dep), Some(asset)) = (
                graph.dependency(dep_node),
                graph.resolved_asset(dep_node).and_then(|n| graph.asset(n)),
            ) else {
                continue;
            };
            let target = dep
                .dependency
                .target
                .clone()
                .unwrap_or_else(|| default_target.clone());
            bundle_graph.add_bundle_group(&dep.dependency.id, &target, &asset.id, LoadKind::Entry, None);
        }

        // Discover groups breadth first; group ids follow discovery order
        let mut reaches: Vec<Reach> = Vec::new();
        while reaches.len() < bundle_graph.groups().len() {
            let group_id = reaches.len();
            let group = &bundle_graph.groups()[group_id];
            let target: Target = group.target.clone();
            let entry = graph
                .asset_node(&group.entry_asset_id)
                .ok_or_else(|| anyhow!("Bundle group entry {} is not in the graph", group.entry_asset_id))?;

            let reach = sync_reach(graph, entry);
            for (dep_node, kind) in &reach.boundaries {
                let (Some(dep), Some(asset)) = (
                    graph.dependency(*dep_node),
                    graph.resolved_asset(*dep_node).and_then(|n| graph.asset(n)),
                ) else {
                    continue;
                };
                let target = match (*kind, &dep.dependency.target) {
                    (LoadKind::Entry, Some(explicit)) => explicit.clone(),
                    _ => target.clone(),
                };
                bundle_graph.add_bundle_group(&dep.dependency.id, &target, &asset.id, *kind, Some(group_id));
            }
            reaches.push(reach);
        }

        let roots: Vec<bool> = bundle_graph
            .groups()
            .iter()
            .map(|g| {
                g.kind != LoadKind::Lazy
                    || g.parents.is_empty()
                    || graph
                        .asset_by_id(&g.entry_asset_id)
                        .map(|a| a.env.is_isolated())
                        .unwrap_or(false)
            })
            .collect();
        let parents: Vec<Vec<BundleGroupId>> =
            bundle_graph.groups().iter().map(|g| g.parents.clone()).collect();
        let dominators = dominators(&roots, &parents);

        // Decide where every reached asset goes
        let mut placements: HashMap<NodeId, Vec<BundleGroupId>> = HashMap::new();
        let mut hoisted: Vec<(BundleGroupId, NodeId)> = Vec::new();
        let mut decided: HashSet<NodeId> = HashSet::new();

        for reach in &reaches {
            for &asset in &reach.assets {
                if !decided.insert(asset) {
                    continue;
                }

                let needing: Vec<BundleGroupId> = (0..reaches.len())
                    .filter(|g| reaches[*g].members.contains(&asset))
                    .filter(|g| !provided(*g, asset, &reaches, &roots, &parents, &mut HashSet::new()))
                    .collect();

                let groups = match needing.as_slice() {
                    [] => Vec::new(),
                    [only] => vec![*only],
                    many => match common_dominator(many, &dominators) {
                        Some(shared) => {
                            if !many.contains(&shared) {
                                hoisted.push((shared, asset));
                            }
                            vec![shared]
                        }
                        None => many.to_vec(),
                    },
                };
                placements.insert(asset, groups);
            }
        }

        for (group_id, reach) in reaches.iter().enumerate() {
            for &asset in &reach.assets {
                let placed_here = placements
                    .get(&asset)
                    .map(|groups| groups.contains(&group_id))
                    .unwrap_or(false);
                if placed_here {
                    place(graph, bundle_graph, group_id, asset)?;
                }
            }
        }
        for (group_id, asset) in hoisted {
            debug!("Hoisting asset node {} into bundle group {}", asset, group_id);
            place(graph, bundle_graph, group_id, asset)?;
        }

        debug!(
            "Created {} bundle(s) in {} group(s)",
            bundle_graph.bundle_count(),
            bundle_graph.groups().len()
        );
        Ok(())
    }
}

fn place(
    graph: &AssetGraph,
    bundle_graph: &mut BundleGraph,
    group: BundleGroupId,
    asset_node: NodeId,
) -> Result<()> {
    let asset = graph
        .asset(asset_node)
        .ok_or_else(|| anyhow!("Node {} is not an asset", asset_node))?;
    let bundle = bundle_graph.add_bundle(
        group,
        BundleOptions {
            bundle_type: asset.asset_type.clone(),
            env: asset.env.clone(),
        },
    )?;
    bundle_graph.add_asset_to_bundle(&bundle, &asset.id)?;
    Ok(())
}

/// Depth-first preorder over synchronous edges
fn sync_reach(graph: &AssetGraph, entry: NodeId) -> Reach {
    let mut reach = Reach {
        assets: Vec::new(),
        members: HashSet::new(),
        boundaries: Vec::new(),
    };
    let mut stack = vec![entry];

    while let Some(node) = stack.pop() {
        if !reach.members.insert(node) {
            continue;
        }
        reach.assets.push(node);

        let mut next = Vec::new();
        for dep_node in graph.dependencies_of(node) {
            let Some(dep) = graph.dependency(dep_node) else {
                continue;
            };
            let dependency = &dep.dependency;
            let discovered = dependency.meta.contains_key(DISCOVERED_META);

            let boundary = if discovered {
                None
            } else if dependency.is_async {
                Some(LoadKind::Lazy)
            } else if dependency.is_url {
                Some(LoadKind::Referenced)
            } else if dependency.is_entry {
                Some(LoadKind::Entry)
            } else {
                None
            };

            match boundary {
                Some(kind) => reach.boundaries.push((dep_node, kind)),
                None => {
                    if let Some(asset) = graph.resolved_asset(dep_node) {
                        next.push(asset);
                    }
                }
            }
        }
        stack.extend(next.into_iter().rev());
    }

    reach
}

/// Whether every parent of `group` ships `asset` by the time `group` loads
fn provided(
    group: BundleGroupId,
    asset: NodeId,
    reaches: &[Reach],
    roots: &[bool],
    parents: &[Vec<BundleGroupId>],
    visited: &mut HashSet<BundleGroupId>,
) -> bool {
    // A group seen twice on one path is part of a cycle; assume nothing
    if roots[group] || !visited.insert(group) {
        return false;
    }
    let loaded_through: Vec<BundleGroupId> =
        parents[group].iter().copied().filter(|p| *p != group).collect();

    !loaded_through.is_empty()
        && loaded_through.iter().all(|&parent| {
            reaches[parent].members.contains(&asset)
                || provided(parent, asset, reaches, roots, parents, visited)
        })
}

/// Groups every load path to each group passes through, itself included
fn dominators(roots: &[bool], parents: &[Vec<BundleGroupId>]) -> Vec<BTreeSet<BundleGroupId>> {
    // `None` stands for "every group" until a parent's set is known
    let mut sets: Vec<Option<BTreeSet<BundleGroupId>>> = roots
        .iter()
        .enumerate()
        .map(|(id, root)| root.then(|| BTreeSet::from([id])))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for group in 0..roots.len() {
            if roots[group] {
                continue;
            }

            let mut common: Option<BTreeSet<BundleGroupId>> = None;
            for &parent in parents[group].iter().filter(|p| **p != group) {
                let Some(parent_set) = &sets[parent] else {
                    continue;
                };
                common = Some(match common {
                    None => parent_set.clone(),
                    Some(acc) => acc.intersection(parent_set).copied().collect(),
                });
            }

            let updated = common.map(|mut set| {
                set.insert(group);
                set
            });
            if updated.is_some() && updated != sets[group] {
                sets[group] = updated;
                changed = true;
            }
        }
    }

    sets.into_iter()
        .enumerate()
        .map(|(id, set)| set.unwrap_or_else(|| BTreeSet::from([id])))
        .collect()
}

/// The latest discovered group that dominates every group in `groups`
fn common_dominator(groups: &[BundleGroupId], dominators: &[BTreeSet<BundleGroupId>]) -> Option<BundleGroupId> {
    let mut common = dominators[groups[0]].clone();
    for group in &groups[1..] {
        common = common.intersection(&dominators[*group]).copied().collect();
    }
    common.into_iter().next_back()
}
