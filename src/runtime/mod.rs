//! Runtime injection
//!
//! A bundle that starts dynamic imports gets loader modules added to it:
//! one orchestration module per import, which loads every bundle of the
//! imported group and then evaluates the imported module, plus the shared
//! URL and per-type loader helpers it requires. The lazily loaded bundles
//! themselves receive nothing.

mod loaders;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::bundler::{Bundle, BundleGraph, LoadKind};
use crate::config::BuildOptions;
use crate::environment::Environment;
use crate::types::{Asset, Code, DependencyOptions};
use crate::utils::short_hash;

pub const BUNDLE_PLACEHOLDER_PREFIX: &str = "{{ASSETPACK_BUNDLE:";
pub const PLACEHOLDER_SUFFIX: &str = "}}";

/// Meta key set on synthesized assets
pub const RUNTIME_META: &str = "runtime";

/// Stand-in for a bundle's URL until names are known
pub fn bundle_placeholder(bundle_id: &str) -> String {
    format!("{}{}{}", BUNDLE_PLACEHOLDER_PREFIX, bundle_id, PLACEHOLDER_SUFFIX)
}

/// An asset produced by a runtime plugin
#[derive(Debug, Clone)]
pub struct RuntimeAsset {
    pub asset: Asset,

    /// (dependency id, asset id) for each dependency of `asset`
    pub links: Vec<(String, String)>,

    /// The dynamic import this asset replaces, if any
    pub dependency_id: Option<String>,
}

/// Runtime plugin contract
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<Vec<RuntimeAsset>>;
}

#[derive(Debug, Default)]
pub struct JsRuntime;

impl JsRuntime {
    pub fn new() -> Self {
        Self
    }
}

/// Directory the synthesized modules pretend to live in
pub fn runtime_dir(root: &Path) -> PathBuf {
    root.join("__assetpack__").join("runtime")
}

fn runtime_asset(path: PathBuf, env: &Environment, code: impl Into<Code>) -> Asset {
    let mut asset = Asset::new(path, env.clone(), code.into());
    asset
        .meta
        .insert(RUNTIME_META.to_string(), serde_json::Value::Bool(true));
    asset.finalize(None);
    asset
}

/// The helper modules, created on first use
struct Helpers<'a> {
    dir: PathBuf,
    env: &'a Environment,
    created: Vec<RuntimeAsset>,
}

impl<'a> Helpers<'a> {
    fn get(&mut self, name: &str) -> String {
        let path = self.dir.join(format!("{}.js", name));
        if let Some(existing) = self.created.iter().find(|r| r.asset.file_path == path) {
            return existing.asset.id.clone();
        }

        let isolated = self.env.is_isolated();
        let code = match name {
            "bundle-loader" => loaders::BUNDLE_LOADER,
            "bundle-url" => loaders::BUNDLE_URL,
            "js-loader" if isolated => loaders::JS_WORKER_LOADER,
            "js-loader" => loaders::JS_LOADER,
            "css-loader" if isolated => loaders::CSS_WORKER_LOADER,
            _ => loaders::CSS_LOADER,
        };
        let asset = runtime_asset(path, self.env, code);
        let id = asset.id.clone();
        self.created.push(RuntimeAsset {
            asset,
            links: Vec::new(),
            dependency_id: None,
        });
        id
    }
}

impl Runtime for JsRuntime {
    fn name(&self) -> &str {
        "js"
    }

    fn apply(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<Vec<RuntimeAsset>> {
        if bundle.bundle_type != "js" {
            return Ok(Vec::new());
        }

        let mut helpers = Helpers {
            dir: runtime_dir(&options.root),
            env: &bundle.env,
            created: Vec::new(),
        };
        let mut lazy_imports = Vec::new();

        for asset_id in &bundle.assets {
            let Some(asset) = bundle_graph.asset(asset_id) else {
                continue;
            };
            if bundle_graph.is_runtime_asset(asset_id) {
                continue;
            }

            for dependency in asset.dependencies.iter().filter(|d| d.is_async) {
                let Some(group) = bundle_graph.bundle_group_for_dependency(&dependency.id) else {
                    continue;
                };
                if group.kind != LoadKind::Lazy {
                    continue;
                }

                let to_load: Vec<&Bundle> = bundle_graph
                    .bundles_in_group(group.id)
                    .into_iter()
                    .filter(|b| b.id != bundle.id)
                    .collect();
                // Everything the import needs is already loaded
                if to_load.is_empty() {
                    continue;
                }

                let mut code = String::from(
                    "var load = require(\"./bundle-loader\");\nvar url = require(\"./bundle-url\");\n",
                );
                let mut specifiers: Vec<(String, String)> = vec![
                    ("./bundle-loader".into(), helpers.get("bundle-loader")),
                    ("./bundle-url".into(), helpers.get("bundle-url")),
                ];

                let loads: Vec<String> = to_load
                    .iter()
                    .map(|b| {
                        let loader = if b.bundle_type == "css" { "css-loader" } else { "js-loader" };
                        let specifier = format!("./{}", loader);
                        if !specifiers.iter().any(|(s, _)| *s == specifier) {
                            specifiers.push((specifier.clone(), helpers.get(loader)));
                        }
                        format!(
                            "  [require(\"{}\"), url.resolve(\"{}\")]",
                            specifier,
                            bundle_placeholder(&b.id)
                        )
                    })
                    .collect();

                // The module to evaluate once loading is done
                let evaluated = bundle_graph
                    .asset(&group.entry_asset_id)
                    .and_then(|target| match target.asset_type.as_str() {
                        "js" => Some(target),
                        _ => bundle_graph
                            .asset_graph()
                            .asset_node(&target.id)
                            .map(|node| bundle_graph.asset_graph().children_of(node))
                            .and_then(|children| {
                                children
                                    .into_iter()
                                    .filter_map(|c| bundle_graph.asset_graph().asset(c))
                                    .find(|c| c.asset_type == "js")
                            }),
                    });

                let resolved = match evaluated {
                    Some(target) => {
                        let specifier = format!("./{}", target.display_name());
                        let expression = format!("require(\"{}\")", specifier);
                        specifiers.push((specifier, target.id.clone()));
                        expression
                    }
                    None => "{}".to_string(),
                };

                code.push_str(&format!(
                    "module.exports = load([\n{}\n]).then(function () {{\n  return {};\n}});\n",
                    loads.join(",\n"),
                    resolved
                ));

                let path = helpers
                    .dir
                    .join(format!("lazy-{}.js", short_hash(&dependency.id)));
                let mut runtime = runtime_asset(path, &bundle.env, code);
                let mut links = Vec::new();
                for (specifier, target_id) in specifiers {
                    let dependency_id = runtime.add_dependency(DependencyOptions::new(specifier));
                    links.push((dependency_id, target_id));
                }

                lazy_imports.push(RuntimeAsset {
                    asset: runtime,
                    links,
                    dependency_id: Some(dependency.id.clone()),
                });
            }
        }

        if lazy_imports.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Injecting {} lazy loader(s) into bundle {}",
            lazy_imports.len(),
            bundle.display_name()
        );

        let mut assets = helpers.created;
        assets.extend(lazy_imports);
        Ok(assets)
    }
}
