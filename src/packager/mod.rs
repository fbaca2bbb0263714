//! Packaging and optimization
//!
//! A packager turns a named bundle into bytes; optimizers then rewrite
//! those bytes in order. References to other bundles are placeholders until
//! packaging, which is the only place final URLs and paths are known.

mod css;
mod js;
mod optimizer;
mod raw;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sourcemap::SourceMapBuilder;

use crate::bundler::{Bundle, BundleGraph};
use crate::config::BuildOptions;
use crate::types::{Asset, Code};
use crate::utils::path_to_module_id;

pub use css::CssPackager;
pub use js::JsPackager;
pub use optimizer::{CssOptimizer, JsOptimizer};
pub use raw::RawPackager;

static BUNDLE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{ASSETPACK_BUNDLE:([0-9a-f]+)\}\}").unwrap());

/// Output of packaging one bundle
#[derive(Debug, Clone, Default)]
pub struct PackagedBundle {
    pub contents: Code,

    /// Source map JSON
    pub map: Option<String>,
}

/// Packager plugin contract
pub trait Packager: Send + Sync {
    fn name(&self) -> &str;

    fn package(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<PackagedBundle>;
}

/// Optimizer plugin contract
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    fn optimize(
        &self,
        bundle: &Bundle,
        packaged: PackagedBundle,
        options: &BuildOptions,
    ) -> Result<PackagedBundle>;
}

/// URL a bundle is served from
pub fn public_path(public_url: &str, name: &str) -> String {
    if public_url.is_empty() || public_url.ends_with('/') {
        format!("{}{}", public_url, name)
    } else {
        format!("{}/{}", public_url, name)
    }
}

/// Replace bundle placeholders with the bundles' public URLs
fn resolve_bundle_urls(text: &str, bundle_graph: &BundleGraph, options: &BuildOptions) -> Result<String> {
    let mut missing = None;
    let resolved = BUNDLE_PLACEHOLDER.replace_all(text, |caps: &Captures| {
        match bundle_graph.bundle(&caps[1]).and_then(|b| b.name.as_deref()) {
            Some(name) => public_path(&options.public_url, name),
            None => {
                missing = Some(caps[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(id) => Err(anyhow!("Reference to unnamed bundle {}", id)),
        None => Ok(resolved.into_owned()),
    }
}

/// Where one asset's emitted code sits in a packaged bundle
struct MappedSection<'a> {
    asset: &'a Asset,
    /// Zero-based output line of the asset's first line
    line: u32,
    lines: u32,
}

impl<'a> MappedSection<'a> {
    fn new(asset: &'a Asset, line: usize, code: &str) -> Self {
        Self {
            asset,
            line: line as u32,
            lines: code.lines().count() as u32,
        }
    }
}

/// Version 3 source map with one mapping per emitted source line
fn source_map(bundle: &Bundle, sections: &[MappedSection<'_>], options: &BuildOptions) -> Result<String> {
    let file = bundle.display_name();
    let mut builder = SourceMapBuilder::new(Some(file.as_str()));

    for section in sections {
        let asset = section.asset;
        let name = pathdiff::diff_paths(&asset.file_path, &options.root)
            .map(|p| path_to_module_id(&p))
            .unwrap_or_else(|| path_to_module_id(&asset.file_path));
        let source = builder.add_source(&name);
        builder.set_source_contents(source, asset.code.as_str().ok());

        for offset in 0..section.lines {
            builder.add_raw(section.line + offset, 0, offset, 0, Some(source), None, false);
        }
    }

    let mut buf = Vec::new();
    builder.into_sourcemap().to_writer(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_path() {
        assert_eq!(public_path("/", "index.js"), "/index.js");
        assert_eq!(public_path("https://cdn.example.com/app", "a.css"), "https://cdn.example.com/app/a.css");
        assert_eq!(public_path("", "a.css"), "a.css");
    }
}
