//! Code transformation
//!
//! Transformers are chained per file type. The [`pipeline`] runs the chain,
//! handles representation reuse, type changes and child assets.

mod css;
mod js;
mod json;
pub mod pipeline;
mod raw;

use anyhow::Result;

use crate::config::BuildOptions;
use crate::types::{Asset, AssetDraft, AssetOutput, Ast};

pub use css::CssTransformer;
pub use js::JsTransformer;
pub use json::JsonTransformer;
pub use pipeline::{TransformOutcome, TransformPipeline, TransformRequest};
pub use raw::RawTransformer;

/// Per-transformer configuration, resolved once per asset
pub type TransformerConfig = serde_json::Value;

/// One result of a transform step
#[derive(Debug)]
pub enum TransformOutput {
    /// Continue through the rest of the chain
    Asset(Asset),
    /// Skip the remaining transformers of the chain
    Final(Asset),
    /// Create a child asset of the asset being transformed
    Draft(AssetDraft),
}

/// Transformer plugin contract.
///
/// Only `transform` is required. A transformer that parses must also be
/// able to `generate`, and must only claim representations it understands
/// in `can_reuse_ast`.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Load configuration; may register connected files on the asset
    fn get_config(
        &self,
        _asset: &mut Asset,
        _options: &BuildOptions,
    ) -> Result<Option<TransformerConfig>> {
        Ok(None)
    }

    fn can_reuse_ast(&self, _ast: &Ast) -> bool {
        false
    }

    fn parse(
        &self,
        _asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<Ast>> {
        Ok(None)
    }

    fn transform(
        &self,
        asset: Asset,
        config: Option<&TransformerConfig>,
        options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>>;

    fn generate(
        &self,
        _asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<AssetOutput>> {
        Ok(None)
    }

    /// Rework the full set of assets produced by the chain for one file
    fn post_process(
        &self,
        _assets: &[Asset],
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<Vec<TransformOutput>>> {
        Ok(None)
    }
}

/// Line/column of a byte offset, both 1-based
pub(crate) fn line_column(source: &str, offset: usize) -> (u32, u32) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() as u32 + 1;
    let column = before
        .rfind('\n')
        .map(|nl| before.len() - nl)
        .unwrap_or(before.len() + 1) as u32;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column() {
        let source = "a\nbc\nimport x";
        assert_eq!(line_column(source, 0), (1, 1));
        assert_eq!(line_column(source, 3), (2, 2));
        assert_eq!(line_column(source, 5), (3, 1));
    }
}
