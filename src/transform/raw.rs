//! Passthrough for binary files such as fonts and images

use anyhow::Result;

use crate::config::BuildOptions;
use crate::types::Asset;

use super::{TransformOutput, Transformer, TransformerConfig};

#[derive(Debug, Default)]
pub struct RawTransformer;

impl RawTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for RawTransformer {
    fn name(&self) -> &str {
        "raw"
    }

    fn transform(
        &self,
        asset: Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>> {
        Ok(vec![TransformOutput::Final(asset)])
    }
}
