//! Runs transformer chains for one (file, environment) unit of work

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::config::BuildOptions;
use crate::environment::Environment;
use crate::plugins::{PluginRegistry, TransformerChain};
use crate::types::{Asset, Code, File};
use crate::utils::hash_parts;

use super::{TransformOutput, TransformerConfig};

/// A chain may hand an asset to another chain this many times
const MAX_PIPELINE_HOPS: usize = 8;

/// Everything a worker needs to transform one file
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub file_path: PathBuf,
    pub env: Environment,
    /// Pre-loaded source; read from disk when `None`
    pub code: Option<Code>,
}

/// The assets one file produced, plus what is needed to cache them
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    /// Final assets; the asset for the file itself comes first
    pub assets: Vec<Asset>,
    /// Assets as they were before post-processing
    pub initial_assets: Vec<Asset>,
    /// Content hash of the source file
    pub hash: String,
    /// The source file and every connected file, with their hashes
    pub connected_files: Vec<File>,
}

/// An asset moving through a chain, with the index of the transformer
/// whose representation it carries and that transformer's config
struct WorkingAsset {
    asset: Asset,
    ast_owner: Option<(usize, Option<TransformerConfig>)>,
}

pub struct TransformPipeline<'a> {
    registry: &'a PluginRegistry,
    options: &'a BuildOptions,
}

impl<'a> TransformPipeline<'a> {
    pub fn new(registry: &'a PluginRegistry, options: &'a BuildOptions) -> Self {
        Self { registry, options }
    }

    /// Hash of everything besides file contents that shapes the output of
    /// transforming `file_path`
    pub fn config_hash(registry: &PluginRegistry, options: &BuildOptions, file_path: &Path) -> String {
        let chain_id = registry
            .transformers_for(file_path)
            .map(|chain| chain.id)
            .unwrap_or_default();

        hash_parts([
            chain_id.as_str(),
            if options.minify { "minify" } else { "" },
            if options.css_modules { "css-modules" } else { "" },
            options.css_modules_pattern.as_str(),
            env!("CARGO_PKG_VERSION"),
        ])
    }

    pub fn run(&self, request: &TransformRequest) -> Result<TransformOutcome> {
        let start = Instant::now();

        let code = match &request.code {
            Some(code) => code.clone(),
            None => fs::read(&request.file_path)
                .map(Code::from)
                .with_context(|| format!("Failed to read {}", request.file_path.display()))?,
        };
        let hash = code.hash();

        let asset = Asset::new(request.file_path.clone(), request.env.clone(), code);
        let (mut assets, initial_assets) = self.run_chain(asset, 0)?;

        let elapsed = start.elapsed().as_millis() as u64;
        for asset in &mut assets {
            asset.stats.time_ms = elapsed;
        }

        let mut connected_files = vec![File::new(request.file_path.clone(), Some(hash.clone()))];
        for file in assets.iter().flat_map(|a| a.connected_files.iter()) {
            if !connected_files.iter().any(|f| f.path == file.path) {
                connected_files.push(file.clone());
            }
        }

        debug!(
            "Transformed {} into {} asset(s) in {}ms",
            request.file_path.display(),
            assets.len(),
            elapsed
        );

        Ok(TransformOutcome {
            assets,
            initial_assets,
            hash,
            connected_files,
        })
    }

    /// Run the chain matching the asset's type.
    ///
    /// Returns the finished assets and the pre-post-processing assets.
    fn run_chain(&self, asset: Asset, hops: usize) -> Result<(Vec<Asset>, Vec<Asset>)> {
        if hops > MAX_PIPELINE_HOPS {
            return Err(anyhow!(
                "Asset type of {} keeps changing between pipelines",
                asset.file_path.display()
            ));
        }

        let chain = self.chain_for(&asset)?;
        let pipeline_type = asset.asset_type.clone();

        let mut working = vec![WorkingAsset {
            asset,
            ast_owner: None,
        }];
        // Assets that skip the rest of this chain, in output order
        let mut settled: Vec<(usize, WorkingAsset)> = Vec::new();
        let mut order = 0usize;
        // Config each transformer loaded for the first asset it saw
        let mut configs: Vec<Option<TransformerConfig>> = vec![None; chain.transformers.len()];

        for (index, transformer) in chain.transformers.iter().enumerate() {
            let mut next = Vec::new();

            for item in working.drain(..) {
                if item.asset.asset_type != pipeline_type {
                    settled.push((order, item));
                    order += 1;
                    continue;
                }

                let WorkingAsset {
                    mut asset,
                    mut ast_owner,
                } = item;

                let config = transformer.get_config(&mut asset, self.options)?;
                if configs[index].is_none() {
                    configs[index] = config.clone();
                }

                if let Some(ast) = &asset.ast {
                    if !transformer.can_reuse_ast(ast) {
                        debug!(
                            "{} cannot reuse the representation of {}, regenerating",
                            transformer.name(),
                            asset.file_path.display()
                        );
                        self.regenerate(&chain, &mut asset, ast_owner.take())?;
                    }
                }

                if asset.ast.is_none() {
                    if let Some(ast) = transformer.parse(&asset, config.as_ref(), self.options)? {
                        asset.ast = Some(ast);
                        ast_owner = Some((index, config.clone()));
                    }
                }

                let parent = Asset {
                    ast: None,
                    ..asset.clone()
                };
                let owner_of = |asset: &Asset| {
                    asset.ast.as_ref().map(|_| {
                        ast_owner
                            .clone()
                            .unwrap_or_else(|| (index, config.clone()))
                    })
                };

                let outputs = transformer
                    .transform(asset, config.as_ref(), self.options)
                    .with_context(|| format!("Transformer '{}' failed", transformer.name()))?;

                for (position, output) in outputs.into_iter().enumerate() {
                    match output {
                        TransformOutput::Asset(asset) => {
                            let ast_owner = owner_of(&asset);
                            next.push(WorkingAsset { asset, ast_owner });
                        }
                        TransformOutput::Final(asset) => {
                            let ast_owner = owner_of(&asset);
                            settled.push((order, WorkingAsset { asset, ast_owner }));
                            order += 1;
                        }
                        TransformOutput::Draft(draft) => {
                            let asset = parent.create_child(draft, position);
                            let ast_owner = asset.ast.as_ref().map(|_| (index, config.clone()));
                            next.push(WorkingAsset { asset, ast_owner });
                        }
                    }
                }
            }

            working = next;
        }

        for item in working {
            settled.push((order, item));
            order += 1;
        }
        settled.sort_by_key(|(order, _)| *order);

        let mut finished = Vec::new();
        let mut initial = Vec::new();

        for (_, item) in settled {
            let WorkingAsset {
                mut asset,
                ast_owner,
            } = item;

            if asset.asset_type != pipeline_type && self.leaves_chain(&chain, &asset)? {
                self.regenerate(&chain, &mut asset, ast_owner)?;
                let (assets, pre) = self.run_chain(asset, hops + 1)?;
                finished.extend(assets);
                initial.extend(pre);
                continue;
            }

            let output = match (&asset.ast, &ast_owner) {
                (Some(_), Some((owner, config))) => match chain.transformers.get(*owner) {
                    Some(transformer) => transformer.generate(&asset, config.as_ref(), self.options)?,
                    None => None,
                },
                _ => None,
            };
            asset.finalize(output);
            finished.push(asset);
        }

        primary_first(&mut finished);

        let initial_here: Vec<Asset> = finished.clone();
        initial.splice(0..0, initial_here);

        let mut finished = self.post_process(&chain, &configs, finished, hops)?;
        primary_first(&mut finished);

        Ok((finished, initial))
    }

    fn post_process(
        &self,
        chain: &TransformerChain,
        configs: &[Option<TransformerConfig>],
        mut assets: Vec<Asset>,
        hops: usize,
    ) -> Result<Vec<Asset>> {
        for (transformer, config) in chain.transformers.iter().zip(configs) {
            let Some(outputs) = transformer.post_process(&assets, config.as_ref(), self.options)? else {
                continue;
            };
            let Some(parent) = assets.first().cloned() else {
                break;
            };

            let mut processed = Vec::new();
            for (position, output) in outputs.into_iter().enumerate() {
                let mut asset = match output {
                    TransformOutput::Asset(asset) | TransformOutput::Final(asset) => asset,
                    TransformOutput::Draft(draft) => parent.create_child(draft, position),
                };

                if asset.asset_type != parent.asset_type {
                    // A new sibling of another type runs its own chain
                    let (children, _) = self.run_chain(asset, hops + 1)?;
                    processed.extend(children);
                    continue;
                }

                if asset.output_hash.is_empty() {
                    asset.finalize(None);
                }
                processed.push(asset);
            }
            assets = processed;
        }

        Ok(assets)
    }

    fn chain_for(&self, asset: &Asset) -> Result<TransformerChain> {
        self.registry.transformers_for(&typed_path(asset))
    }

    /// An asset that changed type leaves only if its new type maps to a
    /// different chain
    fn leaves_chain(&self, current: &TransformerChain, asset: &Asset) -> Result<bool> {
        Ok(self.chain_for(asset)?.id != current.id)
    }

    /// Turn a representation back into code using the transformer that built it
    fn regenerate(
        &self,
        chain: &TransformerChain,
        asset: &mut Asset,
        ast_owner: Option<(usize, Option<TransformerConfig>)>,
    ) -> Result<()> {
        if asset.ast.is_none() {
            return Ok(());
        }
        if let Some((index, config)) = ast_owner {
            if let Some(owner) = chain.transformers.get(index) {
                if let Some(output) = owner.generate(asset, config.as_ref(), self.options)? {
                    asset.code = output.code;
                }
            }
        }
        asset.ast = None;
        Ok(())
    }
}

/// Keep the asset for the file itself ahead of its children
fn primary_first(assets: &mut [Asset]) {
    assets.sort_by_key(|asset| asset.unique_key.is_some());
}

/// Path used for chain lookup: the file path with the asset's current type
fn typed_path(asset: &Asset) -> PathBuf {
    let mut path = asset.file_path.clone();
    if !asset.asset_type.is_empty() {
        path.set_extension(&asset.asset_type);
    }
    path
}

impl std::fmt::Debug for TransformPipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPipeline").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobRule, PluginsConfig};
    use crate::plugins::PluginCatalog;
    use crate::transform::Transformer;
    use std::fs;
    use std::sync::Arc;

    /// Reads a banner from config and prepends it once the chain is done
    #[derive(Debug)]
    struct BannerTransformer;

    impl Transformer for BannerTransformer {
        fn name(&self) -> &str {
            "banner"
        }

        fn get_config(&self, _asset: &mut Asset, _options: &BuildOptions) -> Result<Option<TransformerConfig>> {
            Ok(Some(serde_json::json!({ "banner": "/* banner */" })))
        }

        fn transform(
            &self,
            asset: Asset,
            _config: Option<&TransformerConfig>,
            _options: &BuildOptions,
        ) -> Result<Vec<TransformOutput>> {
            Ok(vec![TransformOutput::Asset(asset)])
        }

        fn post_process(
            &self,
            assets: &[Asset],
            config: Option<&TransformerConfig>,
            _options: &BuildOptions,
        ) -> Result<Option<Vec<TransformOutput>>> {
            let banner = config
                .and_then(|c| c.get("banner"))
                .and_then(|b| b.as_str())
                .ok_or_else(|| anyhow!("post_process ran without config"))?;

            let outputs = assets
                .iter()
                .map(|asset| {
                    let mut asset = asset.clone();
                    let code = format!("{}\n{}", banner, asset.output.code.as_str()?);
                    asset.code = Code::from(code);
                    asset.finalize(None);
                    Ok(TransformOutput::Final(asset))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(outputs))
        }
    }

    fn run(dir: &Path, name: &str, content: &str) -> TransformOutcome {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();

        let registry = PluginRegistry::from_config(&PluginsConfig::default()).unwrap();
        let options = BuildOptions::with_defaults(dir);
        TransformPipeline::new(&registry, &options)
            .run(&TransformRequest {
                file_path: path,
                env: Environment::default(),
                code: None,
            })
            .unwrap()
    }

    #[test]
    fn test_type_change_runs_the_next_chain() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(dir.path(), "data.json", "{ \"a\": 1 }");

        assert_eq!(outcome.assets.len(), 1);
        let asset = &outcome.assets[0];
        assert_eq!(asset.asset_type, "js");
        assert_eq!(asset.file_path, dir.path().join("data.json"));
        assert_eq!(asset.output.code.as_str().unwrap(), r#"module.exports = {"a":1};"#);
        assert!(!asset.output_hash.is_empty());
    }

    #[test]
    fn test_css_modules_child_is_a_script() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(dir.path(), "local.module.css", ".foo { color: red; }");

        assert_eq!(outcome.assets.len(), 2);
        assert_eq!(outcome.assets[0].asset_type, "css");
        assert!(outcome.assets[0].unique_key.is_none());

        let child = &outcome.assets[1];
        assert_eq!(child.asset_type, "js");
        assert_ne!(child.id, outcome.assets[0].id);
        assert!(child.output.code.as_str().unwrap().contains("module.exports"));
    }

    #[test]
    fn test_same_chain_keeps_a_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(
            dir.path(),
            "app.jsx",
            "import './a';\nconst lazy = import('./b');\n",
        );

        assert_eq!(outcome.assets.len(), 1);
        let asset = &outcome.assets[0];
        assert_eq!(asset.asset_type, "js");
        assert_eq!(asset.dependencies.len(), 2);
        assert!(asset.dependencies.iter().any(|d| d.specifier == "./b" && d.is_async));

        let code = asset.output.code.as_str().unwrap();
        assert!(code.contains(r#"require.lazy("./b")"#));
        assert_eq!(code.lines().count(), 2);
    }

    #[test]
    fn test_connected_files_include_the_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".postcssrc"), "{}").unwrap();
        let outcome = run(dir.path(), "index.css", ".a { color: red; }");

        let paths: Vec<&Path> = outcome.connected_files.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(paths[0], dir.path().join("index.css"));
        assert!(paths.contains(&dir.path().join(".postcssrc").as_path()));
        assert_eq!(outcome.hash, Code::from(".a { color: red; }").hash());
    }

    #[test]
    fn test_post_process_sees_the_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.txt");
        fs::write(&path, "plain").unwrap();

        let mut catalog = PluginCatalog::builtin();
        catalog.add_transformer(Arc::new(BannerTransformer));
        let plugins = PluginsConfig {
            transformers: vec![GlobRule::new("*.txt", &["banner"])],
            ..Default::default()
        };
        let registry = PluginRegistry::new(&plugins, &catalog).unwrap();
        let options = BuildOptions::with_defaults(dir.path());

        let outcome = TransformPipeline::new(&registry, &options)
            .run(&TransformRequest {
                file_path: path,
                env: Environment::default(),
                code: None,
            })
            .unwrap();

        assert_eq!(outcome.assets.len(), 1);
        assert!(outcome.assets[0]
            .output
            .code
            .as_str()
            .unwrap()
            .starts_with("/* banner */\n"));
    }
}
