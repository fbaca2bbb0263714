//! Bundle naming

use anyhow::Result;

use crate::bundler::{Bundle, BundleGraph};
use crate::config::BuildOptions;
use crate::utils::{file_stem, hash_parts, short_hash};

/// Namer plugin contract. Returning `None` defers to the next namer.
pub trait Namer: Send + Sync {
    fn name(&self) -> &str;

    fn name_bundle(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<Option<String>>;
}

/// Entry bundles keep a plain `<stem>.<type>` name; every other bundle gets
/// a hash of its assets' output in its name.
///
/// A bundle without a main entry, such as the stylesheet split off a script
/// entry, takes the stem of the first asset it received.
#[derive(Debug, Default)]
pub struct DefaultNamer;

impl DefaultNamer {
    pub fn new() -> Self {
        Self
    }

    /// Stem of the bundle's main entry, or of the first asset it reached
    fn stem(bundle: &Bundle, bundle_graph: &BundleGraph) -> String {
        bundle
            .main_entry
            .iter()
            .chain(bundle.assets.iter())
            .find_map(|id| bundle_graph.asset(id))
            .map(|asset| file_stem(&asset.file_path))
            .unwrap_or_else(|| "bundle".to_string())
    }

    /// Hash of the bundle's type and each asset's final output
    pub fn content_hash(bundle: &Bundle, bundle_graph: &BundleGraph) -> String {
        let mut parts = vec![bundle.bundle_type.clone()];
        parts.extend(
            bundle
                .assets
                .iter()
                .filter_map(|id| bundle_graph.asset(id))
                .map(|asset| asset.output_hash.clone()),
        );
        hash_parts(parts)
    }
}

impl Namer for DefaultNamer {
    fn name(&self) -> &str {
        "default"
    }

    fn name_bundle(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        _options: &BuildOptions,
    ) -> Result<Option<String>> {
        let stem = Self::stem(bundle, bundle_graph);

        if bundle.is_entry {
            let name = format!("{}.{}", stem, bundle.bundle_type);

            // The first entry bundle to claim a name keeps it
            let taken = bundle_graph
                .bundles()
                .take_while(|other| other.id != bundle.id)
                .any(|other| {
                    other.is_entry
                        && other.target.dist_dir == bundle.target.dist_dir
                        && other.bundle_type == bundle.bundle_type
                        && Self::stem(other, bundle_graph) == stem
                });
            if !taken {
                return Ok(Some(name));
            }
        }

        let hash = Self::content_hash(bundle, bundle_graph);
        Ok(Some(format!(
            "{}.{}.{}",
            stem,
            short_hash(&hash),
            bundle.bundle_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{BundleOptions, LoadKind};
    use crate::environment::{Environment, Target};
    use crate::graph::AssetGraph;
    use crate::types::{Asset, Code, Dependency};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn target() -> Target {
        Target {
            name: "default".into(),
            dist_dir: PathBuf::from("/dist"),
            env: Environment::default(),
        }
    }

    fn bundle_graph(files: &[(&str, &str)]) -> (BundleGraph, Vec<String>) {
        let mut graph = AssetGraph::new();
        let mut ids = Vec::new();
        for (path, code) in files {
            let mut asset = Asset::new(*path, Environment::default(), Code::from(*code));
            asset.finalize(None);
            ids.push(asset.id.clone());
            graph
                .add_assets(&AssetGraph::request_key(Path::new(path), &asset.env), vec![asset])
                .unwrap();
        }
        graph.add_entry_dependency(Dependency::entry(files[0].0, target()));
        (BundleGraph::new(Arc::new(graph)), ids)
    }

    fn js() -> BundleOptions {
        BundleOptions {
            bundle_type: "js".into(),
            env: Environment::default(),
        }
    }

    #[test]
    fn test_entry_and_hashed_names() {
        let (mut graph, ids) = bundle_graph(&[("/src/index.js", "a"), ("/src/lazy.js", "b")]);
        let entry = graph.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
        let lazy = graph.add_bundle_group("d1", &target(), &ids[1], LoadKind::Lazy, Some(entry));
        let entry_bundle = graph.add_bundle(entry, js()).unwrap();
        let lazy_bundle = graph.add_bundle(lazy, js()).unwrap();
        graph.add_asset_to_bundle(&entry_bundle, &ids[0]).unwrap();
        graph.add_asset_to_bundle(&lazy_bundle, &ids[1]).unwrap();

        let namer = DefaultNamer::new();
        let options = BuildOptions::with_defaults("/");

        let name = |id: &str| {
            namer
                .name_bundle(graph.bundle(id).unwrap(), &graph, &options)
                .unwrap()
                .unwrap()
        };

        assert_eq!(name(&entry_bundle), "index.js");
        let lazy_name = name(&lazy_bundle);
        assert!(lazy_name.starts_with("lazy."));
        assert!(lazy_name.ends_with(".js"));
        assert_eq!(lazy_name.len(), "lazy.".len() + 8 + ".js".len());
    }

    #[test]
    fn test_hash_follows_content_only() {
        let (mut first, ids) = bundle_graph(&[("/src/a/index.js", "same"), ("/src/b/lazy.js", "one")]);
        let (mut second, ids2) = bundle_graph(&[("/src/a/index.js", "same"), ("/src/b/lazy.js", "two")]);

        let mut names = Vec::new();
        for (graph, ids) in [(&mut first, &ids), (&mut second, &ids2)] {
            let entry = graph.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
            let lazy = graph.add_bundle_group("d1", &target(), &ids[0], LoadKind::Lazy, Some(entry));
            let other = graph.add_bundle_group("d2", &target(), &ids[1], LoadKind::Lazy, Some(entry));
            let a = graph.add_bundle(lazy, js()).unwrap();
            let b = graph.add_bundle(other, js()).unwrap();
            graph.add_asset_to_bundle(&a, &ids[0]).unwrap();
            graph.add_asset_to_bundle(&b, &ids[1]).unwrap();

            let options = BuildOptions::with_defaults("/");
            let namer = DefaultNamer::new();
            names.push((
                namer.name_bundle(graph.bundle(&a).unwrap(), graph, &options).unwrap(),
                namer.name_bundle(graph.bundle(&b).unwrap(), graph, &options).unwrap(),
            ));
        }

        // Unchanged content keeps its name, changed content gets a new one
        assert_eq!(names[0].0, names[1].0);
        assert_ne!(names[0].1, names[1].1);
    }

    #[test]
    fn test_sibling_bundle_takes_its_first_asset_stem() {
        let (mut graph, ids) = bundle_graph(&[
            ("/src/index.js", "a"),
            ("/src/local.css", ".local {}"),
            ("/src/index.css", ".index {}"),
        ]);
        let entry = graph.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
        let script = graph.add_bundle(entry, js()).unwrap();
        let styles = graph
            .add_bundle(
                entry,
                BundleOptions {
                    bundle_type: "css".into(),
                    env: Environment::default(),
                },
            )
            .unwrap();
        graph.add_asset_to_bundle(&script, &ids[0]).unwrap();
        graph.add_asset_to_bundle(&styles, &ids[1]).unwrap();
        graph.add_asset_to_bundle(&styles, &ids[2]).unwrap();

        let options = BuildOptions::with_defaults("/");
        let namer = DefaultNamer::new();
        let name = |id: &str| {
            namer
                .name_bundle(graph.bundle(id).unwrap(), &graph, &options)
                .unwrap()
                .unwrap()
        };

        assert_eq!(name(&script), "index.js");
        assert_eq!(name(&styles), "local.css");
    }

    #[test]
    fn test_colliding_entry_names_fall_back_to_hashes() {
        let (mut graph, ids) = bundle_graph(&[("/src/a/index.js", "a"), ("/src/b/index.js", "b")]);
        let first = graph.add_bundle_group("d0", &target(), &ids[0], LoadKind::Entry, None);
        let second = graph.add_bundle_group("d1", &target(), &ids[1], LoadKind::Entry, None);
        let a = graph.add_bundle(first, js()).unwrap();
        let b = graph.add_bundle(second, js()).unwrap();
        graph.add_asset_to_bundle(&a, &ids[0]).unwrap();
        graph.add_asset_to_bundle(&b, &ids[1]).unwrap();

        let options = BuildOptions::with_defaults("/");
        let namer = DefaultNamer::new();
        let a_name = namer.name_bundle(graph.bundle(&a).unwrap(), &graph, &options).unwrap().unwrap();
        let b_name = namer.name_bundle(graph.bundle(&b).unwrap(), &graph, &options).unwrap().unwrap();

        assert_eq!(a_name, "index.js");
        assert_ne!(b_name, "index.js");
        assert!(b_name.starts_with("index."));
    }
}
