//! JSON transformer: validates the document and turns it into a script module

use anyhow::{Context, Result};

use crate::config::BuildOptions;
use crate::types::{Asset, Code};

use super::{TransformOutput, Transformer, TransformerConfig};

#[derive(Debug, Default)]
pub struct JsonTransformer;

impl JsonTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for JsonTransformer {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(
        &self,
        mut asset: Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>> {
        let source = asset.code.as_str()?;

        // Validate JSON
        let value: serde_json::Value = serde_json::from_str(source)
            .with_context(|| format!("Invalid JSON in {}", asset.file_path.display()))?;

        asset.code = Code::from(format!("module.exports = {};", serde_json::to_string(&value)?));
        asset.asset_type = "js".to_string();

        Ok(vec![TransformOutput::Asset(asset)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;

    #[test]
    fn test_json_becomes_a_script_module() {
        let asset = Asset::new("/src/data.json", Environment::default(), Code::from("{ \"a\": [1, 2] }"));
        let outputs = JsonTransformer::new()
            .transform(asset, None, &BuildOptions::with_defaults("/"))
            .unwrap();

        let TransformOutput::Asset(asset) = &outputs[0] else {
            panic!("expected an asset");
        };
        assert_eq!(asset.asset_type, "js");
        assert_eq!(asset.code.as_str().unwrap(), r#"module.exports = {"a":[1,2]};"#);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let asset = Asset::new("/src/data.json", Environment::default(), Code::from("{ nope"));
        let err = JsonTransformer::new()
            .transform(asset, None, &BuildOptions::with_defaults("/"))
            .unwrap_err();

        assert!(err.to_string().contains("Invalid JSON"));
    }
}
