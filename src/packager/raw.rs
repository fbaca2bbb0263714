use anyhow::{Context, Result};

use crate::bundler::{Bundle, BundleGraph};
use crate::config::BuildOptions;

use super::{PackagedBundle, Packager};

/// Writes asset output bytes unchanged, for fonts, images and other files
/// that are only referenced by URL
#[derive(Debug, Default)]
pub struct RawPackager;

impl RawPackager {
    pub fn new() -> Self {
        Self
    }
}

impl Packager for RawPackager {
    fn name(&self) -> &str {
        "raw"
    }

    fn package(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        _options: &BuildOptions,
    ) -> Result<PackagedBundle> {
        let mut contents = Vec::new();
        for asset_id in &bundle.assets {
            let asset = bundle_graph
                .asset(asset_id)
                .with_context(|| format!("Bundle {} lists unknown asset {}", bundle.id, asset_id))?;
            contents.extend_from_slice(asset.output.code.as_bytes());
        }

        Ok(PackagedBundle {
            contents: contents.into(),
            map: None,
        })
    }
}
