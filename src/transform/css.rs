//! Stylesheet transformer
//!
//! Handles `@import` rules, `url()` references and CSS modules. Imported
//! stylesheets become synchronous dependencies and their rules are dropped
//! from the text; the packager inlines them in bundle order. `url()`
//! references become URL dependencies whose specifier in the text is
//! replaced by the dependency id until packaging.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use semver::{Version, VersionReq};
use serde_json::Value;
use tracing::debug;

use crate::config::BuildOptions;
use crate::types::{Asset, AssetDraft, AssetOutput, Ast, AstKind, DependencyOptions, File};
use crate::utils::{hash_content, hash_parts, short_hash};

use super::{TransformOutput, Transformer, TransformerConfig};

static IMPORT_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?\s*([^;]*);"#).unwrap()
});

static URL_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)\s]*))\s*\)"#).unwrap()
});

/// Text before an opening brace: a selector list or an at-rule prelude
static PRELUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^{}]+)\{").unwrap());

static CLASS_SELECTOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap());

static STYLESHEET_VERSION: Lazy<Version> = Lazy::new(|| Version::new(7, 0, 0));

static STYLESHEET_RANGE: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("^7.0.0").unwrap());

const CONFIG_FILES: [&str; 2] = [".postcssrc", ".postcssrc.json"];

const CSS_MODULES_KEY: &str = "cssModules";

/// Parsed stylesheet
#[derive(Debug, Clone)]
pub struct CssProgram {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct CssTransformer;

impl CssTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Nearest config file at or above the asset's directory, up to the root
    fn find_config(file_path: &Path, root: &Path) -> Option<PathBuf> {
        let mut dir = file_path.parent()?.to_path_buf();
        loop {
            for name in CONFIG_FILES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            if dir == root || !dir.pop() {
                return None;
            }
        }
    }

    fn is_external(url: &str) -> bool {
        url.is_empty()
            || url.starts_with("data:")
            || url.starts_with("http:")
            || url.starts_with("https:")
            || url.starts_with("//")
            || url.starts_with('#')
    }

    fn modules_enabled(asset: &Asset, config: Option<&TransformerConfig>, options: &BuildOptions) -> bool {
        let by_name = asset
            .file_path
            .file_name()
            .map(|name| name.to_string_lossy().contains(".module."))
            .unwrap_or(false);
        let by_config = config
            .and_then(|c| c.get("modules"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        by_name || by_config || options.css_modules
    }

    /// Expand the class name pattern for one local class
    fn scoped_name(pattern: &str, asset: &Asset, local: &str) -> String {
        let name = asset
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = name
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or(name)
            .replace('.', "_");
        let hash = hash_parts([asset.file_path.to_string_lossy().as_ref(), local]);

        pattern
            .replace("[name]", &name)
            .replace("[local]", local)
            .replace("[hash:8]", short_hash(&hash))
            .replace("[hash]", &hash)
    }

    /// Rename class selectors, leaving declarations and at-rule preludes alone
    fn scope_classes(text: &str, pattern: &str, asset: &mut Asset) -> String {
        let mut classes = serde_json::Map::new();

        let scoped = PRELUDE.replace_all(text, |caps: &Captures| {
            let prelude = &caps[1];
            if prelude.trim_start().starts_with('@') {
                return caps[0].to_string();
            }
            let renamed = CLASS_SELECTOR.replace_all(prelude, |class: &Captures| {
                let local = &class[1];
                let scoped = classes
                    .entry(local.to_string())
                    .or_insert_with(|| Value::String(Self::scoped_name(pattern, asset, local)));
                format!(".{}", scoped.as_str().unwrap_or(local))
            });
            format!("{}{{", renamed)
        });

        let scoped = scoped.into_owned();
        asset.meta.insert(CSS_MODULES_KEY.to_string(), Value::Object(classes));
        scoped
    }
}

impl Transformer for CssTransformer {
    fn name(&self) -> &str {
        "css"
    }

    fn get_config(
        &self,
        asset: &mut Asset,
        options: &BuildOptions,
    ) -> Result<Option<TransformerConfig>> {
        let Some(path) = Self::find_config(&asset.file_path, &options.root) else {
            return Ok(None);
        };

        let content = fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        asset.add_connected_file(File::new(path.clone(), Some(hash_content(&content))));

        let config: Value = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if !config.is_object() {
            bail!("{} should contain a JSON object", path.display());
        }

        debug!("Loaded stylesheet config from {}", path.display());
        Ok(Some(config))
    }

    fn can_reuse_ast(&self, ast: &Ast) -> bool {
        ast.is_compatible(AstKind::Stylesheet, &STYLESHEET_RANGE)
    }

    fn parse(
        &self,
        asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<Ast>> {
        let text = asset.code.as_str()?.to_string();
        Ok(Some(Ast::new(
            AstKind::Stylesheet,
            STYLESHEET_VERSION.clone(),
            CssProgram { text },
        )))
    }

    fn transform(
        &self,
        mut asset: Asset,
        config: Option<&TransformerConfig>,
        options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>> {
        let source = match asset.ast.as_ref().and_then(|ast| ast.program::<CssProgram>()) {
            Some(program) => program.text.clone(),
            None => asset.code.as_str()?.to_string(),
        };

        // 1. @import rules become dependencies; remote imports stay in place
        let mut imports = Vec::new();
        let text = IMPORT_RULE.replace_all(&source, |caps: &Captures| {
            let specifier = caps[1].to_string();
            if Self::is_external(&specifier) {
                return caps[0].to_string();
            }
            imports.push((specifier, caps[2].trim().to_string()));
            String::new()
        });
        let text = text.into_owned();

        for (specifier, media) in imports {
            let mut dependency = DependencyOptions::new(specifier);
            if !media.is_empty() {
                dependency = dependency.with_meta("media", Value::String(media));
            }
            asset.add_dependency(dependency);
        }

        // 2. url() references
        let mut references = Vec::new();
        let text = URL_REFERENCE.replace_all(&text, |caps: &Captures| {
            let url = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if Self::is_external(url) {
                return caps[0].to_string();
            }
            references.push(url.to_string());
            format!("url(\"{}\")", references.len() - 1)
        });
        let mut text = text.into_owned();

        for (index, url) in references.iter().enumerate() {
            let id = asset.add_dependency(DependencyOptions::new(url.as_str()).url());
            text = text.replacen(&format!("url(\"{}\")", index), &format!("url(\"{}\")", id), 1);
        }

        // 3. CSS modules
        if Self::modules_enabled(&asset, config, options) {
            text = Self::scope_classes(&text, &options.css_modules_pattern, &mut asset);
        }

        asset.asset_type = "css".to_string();
        asset.ast = Some(Ast::new(
            AstKind::Stylesheet,
            STYLESHEET_VERSION.clone(),
            CssProgram { text },
        ));

        Ok(vec![TransformOutput::Asset(asset)])
    }

    fn generate(
        &self,
        asset: &Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<AssetOutput>> {
        Ok(asset
            .ast
            .as_ref()
            .and_then(|ast| ast.program::<CssProgram>())
            .map(|program| AssetOutput {
                code: program.text.clone().into(),
                ..AssetOutput::default()
            }))
    }

    /// Expose the CSS modules class map as a script sibling
    fn post_process(
        &self,
        assets: &[Asset],
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Option<Vec<TransformOutput>>> {
        let Some(classes) = assets.first().and_then(|a| a.meta.get(CSS_MODULES_KEY)) else {
            return Ok(None);
        };

        let exports = serde_json::to_string_pretty(classes)?;
        let mut draft = AssetDraft::new("js", format!("module.exports = {};", exports));
        draft.unique_key = Some("css-modules".to_string());

        let mut outputs: Vec<TransformOutput> = assets
            .iter()
            .cloned()
            .map(TransformOutput::Asset)
            .collect();
        outputs.push(TransformOutput::Draft(draft));

        Ok(Some(outputs))
    }
}
