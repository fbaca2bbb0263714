use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::bundler::{Bundle, BundleGraph};
use crate::config::BuildOptions;
use crate::types::Asset;
use crate::utils::relative_path;

use super::{resolve_bundle_urls, source_map, MappedSection, PackagedBundle, Packager};

static DEPENDENCY_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"url\("([0-9a-f]{16})"\)"#).unwrap());

/// Concatenates stylesheets so that imported rules come before the rules
/// of the sheet importing them
#[derive(Debug, Default)]
pub struct CssPackager;

impl CssPackager {
    pub fn new() -> Self {
        Self
    }

    /// Post-order walk over `@import` edges that stay inside the bundle
    fn order<'a>(bundle: &Bundle, bundle_graph: &'a BundleGraph) -> Result<Vec<(&'a Asset, Option<String>)>> {
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();

        for asset_id in &bundle.assets {
            Self::visit(asset_id, None, bundle, bundle_graph, &mut visited, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        asset_id: &str,
        media: Option<String>,
        bundle: &Bundle,
        bundle_graph: &'a BundleGraph,
        visited: &mut HashSet<String>,
        ordered: &mut Vec<(&'a Asset, Option<String>)>,
    ) -> Result<()> {
        if !visited.insert(asset_id.to_string()) {
            return Ok(());
        }
        let asset = bundle_graph
            .asset(asset_id)
            .with_context(|| format!("Bundle {} lists unknown asset {}", bundle.id, asset_id))?;

        for dependency in asset.dependencies.iter().filter(|d| !d.is_url) {
            let Some(imported) = bundle_graph.resolve_dependency(&dependency.id) else {
                continue;
            };
            if !bundle.contains(&imported.id) {
                continue;
            }
            let media = dependency
                .meta
                .get("media")
                .and_then(|m| m.as_str())
                .map(str::to_string);
            Self::visit(&imported.id, media, bundle, bundle_graph, visited, ordered)?;
        }

        ordered.push((asset, media));
        Ok(())
    }

    /// Path of the bundle a `url()` dependency was placed in, relative to this bundle
    fn reference_path(dependency_id: &str, bundle: &Bundle, bundle_graph: &BundleGraph) -> Option<String> {
        let group = bundle_graph.bundle_group_for_dependency(dependency_id)?;
        let target = bundle_graph
            .bundles_in_group(group.id)
            .into_iter()
            .find(|b| b.contains(&group.entry_asset_id))?;
        let target_path = target.file_path.as_deref()?;
        let from = bundle
            .file_path
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(&bundle.target.dist_dir);
        relative_path(from, target_path)
    }

    fn rewrite_urls(asset: &Asset, code: &str, bundle: &Bundle, bundle_graph: &BundleGraph) -> String {
        DEPENDENCY_URL
            .replace_all(code, |caps: &Captures| {
                let Some(dependency) = asset.dependency(&caps[1]) else {
                    return caps[0].to_string();
                };
                let url = Self::reference_path(&dependency.id, bundle, bundle_graph)
                    .unwrap_or_else(|| dependency.specifier.clone());
                format!("url(\"{}\")", url)
            })
            .into_owned()
    }
}

impl Packager for CssPackager {
    fn name(&self) -> &str {
        "css"
    }

    fn package(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<PackagedBundle> {
        let ordered = Self::order(bundle, bundle_graph)?;
        let mut output = String::new();
        let mut sections = Vec::new();

        for (asset, media) in &ordered {
            let code = asset.output.code.as_str()?;
            let code = Self::rewrite_urls(asset, code.trim_end(), bundle, bundle_graph);
            if code.is_empty() {
                continue;
            }

            let line = output.matches('\n').count();
            match media {
                Some(media) => {
                    sections.push(MappedSection::new(asset, line + 1, &code));
                    output.push_str(&format!("@media {} {{\n{}\n}}\n", media, code));
                }
                None => {
                    sections.push(MappedSection::new(asset, line, &code));
                    output.push_str(&code);
                    output.push('\n');
                }
            }
        }

        let output = resolve_bundle_urls(&output, bundle_graph, options)?;
        let map = if options.source_maps {
            Some(source_map(bundle, &sections, options)?)
        } else {
            None
        };

        Ok(PackagedBundle {
            contents: output.into(),
            map,
        })
    }
}
