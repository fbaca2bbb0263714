use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use assetpack_lib::assetpack::BundleInfo;
use assetpack_lib::config::{GlobRule, Mode, PluginsConfig};
use assetpack_lib::packager::{CssOptimizer, JsOptimizer};
use assetpack_lib::plugins::{PluginCatalog, PluginRegistry};
use assetpack_lib::transform::{TransformOutput, Transformer, TransformerConfig};
use assetpack_lib::types::{Asset, DependencyOptions};
use assetpack_lib::{Assetpack, BuildError, BuildOptions, Config};

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn config(root: &Path, entries: &[&str]) -> Config {
    let mut config = Config::default_config(root);
    config.entries = entries.iter().map(|e| e.to_string()).collect();
    config.cache.enabled = false;
    config
}

fn assetpack(root: &Path, entries: &[&str]) -> Assetpack {
    let config = config(root, entries);
    let options = BuildOptions::from_config(&config).unwrap();
    Assetpack::new(&config, options).unwrap()
}

fn bundle<'a>(bundles: &'a [BundleInfo], name: &str) -> &'a BundleInfo {
    bundles
        .iter()
        .find(|b| b.name == name)
        .unwrap_or_else(|| panic!("no bundle named {}", name))
}

fn read(bundle: &BundleInfo) -> String {
    fs::read_to_string(&bundle.output_path).unwrap()
}

fn project() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[tokio::test]
async fn test_css_imported_from_js_lands_in_a_sibling_bundle() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./local\";\nimport \"./index.css\";\n");
    write(root, "src/local.js", "import \"./local.css\";\nmodule.exports = 1;\n");
    let index_css = write(root, "src/index.css", ".index { color: red; }\n");
    let local_css = write(root, "src/local.css", ".local { color: blue; }\n");

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();

    let mut names: Vec<&str> = result.bundles.iter().map(|b| b.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["index.js", "local.css"]);

    let js = bundle(&result.bundles, "index.js");
    assert_eq!(
        js.asset_paths,
        vec![root.join("src/index.js"), root.join("src/local.js")]
    );

    // Styles keep the order the script imports them in
    let css = bundle(&result.bundles, "local.css");
    assert_eq!(css.asset_paths, vec![local_css, index_css]);

    let contents = read(css);
    let local = contents.find(".local").unwrap();
    let index = contents.find(".index").unwrap();
    assert!(local < index);
    assert_eq!(css.output_path, root.join("dist").join("local.css"));
}

#[tokio::test]
async fn test_dynamic_import_creates_a_lazy_bundle_with_a_loader() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import(\"./async\").then((m) => console.log(m));\n");
    write(root, "src/async.js", "module.exports = \"later\";\n");

    let mut build = assetpack(root, &["src/index.js"]);
    let result = build.build().await.unwrap();
    assert_eq!(result.bundles.len(), 2);

    let bundle_graph = build.bundle_graph().unwrap();
    let entry_bundle = bundle_graph.bundles().find(|b| b.is_entry).unwrap();
    let entry_assets = bundle_graph.entry_assets(&entry_bundle.id);
    assert_eq!(entry_assets.len(), 1);
    assert_eq!(entry_assets[0].file_path, root.join("src/index.js"));

    let entry = bundle(&result.bundles, "index.js");
    assert!(entry.is_entry);
    assert!(entry
        .asset_paths
        .iter()
        .any(|p| p.to_string_lossy().contains("__assetpack__")));

    let lazy = result.bundles.iter().find(|b| !b.is_entry).unwrap();
    assert!(lazy.name.starts_with("async."));
    assert!(lazy.name.ends_with(".js"));
    assert_eq!(lazy.asset_paths, vec![root.join("src/async.js")]);

    let contents = read(entry);
    assert!(!contents.contains("{{ASSETPACK_BUNDLE:"));
    assert!(contents.contains(&format!("/{}", lazy.name)));
    assert!(contents.contains("require.lazy("));

    assert_eq!(result.manifest.get("index.js").map(String::as_str), Some("/index.js"));
    assert!(root.join("dist").join("manifest.json").is_file());
}

#[tokio::test]
async fn test_lazy_group_with_styles_loads_both_bundles() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import(\"./async\");\n");
    write(root, "src/async.js", "import \"./async.css\";\nmodule.exports = 1;\n");
    write(root, "src/async.css", ".async { color: green; }\n");

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();
    assert_eq!(result.bundles.len(), 3);

    let lazy_js = result.bundles.iter().find(|b| !b.is_entry && b.bundle_type == "js").unwrap();
    let lazy_css = result.bundles.iter().find(|b| b.bundle_type == "css").unwrap();
    assert!(lazy_css.name.starts_with("async."));
    assert!(!lazy_css.is_entry);

    for lazy in [lazy_js, lazy_css] {
        assert!(!lazy
            .asset_paths
            .iter()
            .any(|p| p.to_string_lossy().contains("__assetpack__")));
    }

    let entry = read(bundle(&result.bundles, "index.js"));
    assert!(entry.contains(&format!("/{}", lazy_js.name)));
    assert!(entry.contains(&format!("/{}", lazy_css.name)));
}

#[tokio::test]
async fn test_code_shared_by_lazy_imports_loads_with_the_entry() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import(\"./a\");\nimport(\"./b\");\n");
    write(root, "src/a.js", "import \"./shared\";\nmodule.exports = \"a\";\n");
    write(root, "src/b.js", "import \"./shared\";\nmodule.exports = \"b\";\n");
    let shared = write(root, "src/shared.js", "module.exports = \"shared\";\n");

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();
    assert_eq!(result.bundles.len(), 3);

    let entry = bundle(&result.bundles, "index.js");
    assert!(entry.asset_paths.contains(&shared));
    for lazy in result.bundles.iter().filter(|b| !b.is_entry) {
        assert!(!lazy.asset_paths.contains(&shared));
        assert_eq!(lazy.asset_paths.len(), 1);
    }
}

#[tokio::test]
async fn test_lazy_import_of_an_already_loaded_module_adds_nothing() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./shared\";\nimport(\"./page\");\n");
    write(root, "src/page.js", "import \"./shared\";\nmodule.exports = \"page\";\n");
    let shared = write(root, "src/shared.js", "module.exports = \"shared\";\n");

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();

    let page = result.bundles.iter().find(|b| !b.is_entry).unwrap();
    assert_eq!(page.asset_paths, vec![root.join("src/page.js")]);
    assert!(bundle(&result.bundles, "index.js").asset_paths.contains(&shared));
}

#[tokio::test]
async fn test_code_shared_across_separate_entries_is_duplicated() {
    let dir = project();
    let root = dir.path();
    write(root, "src/one.js", "import(\"./a\");\n");
    write(root, "src/two.js", "import(\"./b\");\n");
    write(root, "src/a.js", "import \"./shared\";\nmodule.exports = \"a\";\n");
    write(root, "src/b.js", "import \"./shared\";\nmodule.exports = \"b\";\n");
    let shared = write(root, "src/shared.js", "module.exports = \"shared\";\n");

    let result = assetpack(root, &["src/one.js", "src/two.js"]).build().await.unwrap();
    assert_eq!(result.bundles.len(), 4);

    let lazy: Vec<&BundleInfo> = result.bundles.iter().filter(|b| !b.is_entry).collect();
    assert_eq!(lazy.len(), 2);
    for info in lazy {
        assert!(info.asset_paths.contains(&shared));
        assert!(read(info).contains("\"shared\""));
    }
    assert!(!bundle(&result.bundles, "one.js").asset_paths.contains(&shared));
    assert!(!bundle(&result.bundles, "two.js").asset_paths.contains(&shared));
}

#[tokio::test]
async fn test_entry_lazy_and_referenced_bundles_in_one_build() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./style.css\";\nimport(\"./page\");\n");
    write(root, "src/style.css", "@font-face {\n  src: url(\"./font.woff2\");\n}\n");
    write(root, "src/page.js", "module.exports = \"page\";\n");
    fs::write(root.join("src/font.woff2"), [0x77, 0x4f, 0x46, 0x32]).unwrap();

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();

    let mut kinds: Vec<(String, bool)> = result
        .bundles
        .iter()
        .map(|b| (b.bundle_type.clone(), b.is_entry))
        .collect();
    kinds.sort();
    assert_eq!(
        kinds,
        vec![
            ("css".to_string(), true),
            ("js".to_string(), false),
            ("js".to_string(), true),
            ("woff2".to_string(), false),
        ]
    );

    let font = result.bundles.iter().find(|b| b.bundle_type == "woff2").unwrap();
    let page = result.bundles.iter().find(|b| b.bundle_type == "js" && !b.is_entry).unwrap();
    assert!(read(bundle(&result.bundles, "style.css")).contains(&font.name));
    assert!(read(bundle(&result.bundles, "index.js")).contains(&format!("/{}", page.name)));
    assert!(!read(bundle(&result.bundles, "index.js")).contains(&font.name));
}

#[tokio::test]
async fn test_only_changed_bundles_get_new_names() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import(\"./a\");\nimport(\"./b\");\n");
    write(root, "src/a.js", "module.exports = \"a\";\n");
    let b = write(root, "src/b.js", "module.exports = \"b\";\n");

    let mut build = assetpack(root, &["src/index.js"]);
    let first = build.build().await.unwrap();
    let name_of = |bundles: &[BundleInfo], stem: &str| {
        bundles
            .iter()
            .find(|info| info.name.starts_with(stem))
            .map(|info| info.name.clone())
            .unwrap()
    };

    // Same input, same names
    let again = build.rebuild(&[]).await.unwrap();
    assert_eq!(name_of(&first.bundles, "a."), name_of(&again.bundles, "a."));
    assert_eq!(name_of(&first.bundles, "b."), name_of(&again.bundles, "b."));

    fs::write(&b, "module.exports = \"changed\";\n").unwrap();
    let second = build.rebuild(&[b]).await.unwrap();

    assert_eq!(name_of(&first.bundles, "a."), name_of(&second.bundles, "a."));
    assert_ne!(name_of(&first.bundles, "b."), name_of(&second.bundles, "b."));
    assert!(second.bundles.iter().any(|info| info.name == "index.js"));
}

#[tokio::test]
async fn test_css_url_references_are_emitted_and_rewritten() {
    let dir = project();
    let root = dir.path();
    write(
        root,
        "src/index.css",
        "@font-face {\n  font-family: Test;\n  src: url(\"./test.woff2\");\n}\n",
    );
    let font_bytes: Vec<u8> = vec![0x77, 0x4f, 0x46, 0x32, 0x00, 0xff, 0x10];
    fs::write(root.join("src/test.woff2"), &font_bytes).unwrap();

    let result = assetpack(root, &["src/index.css"]).build().await.unwrap();

    let font = result.bundles.iter().find(|b| b.bundle_type == "woff2").unwrap();
    assert!(font.name.starts_with("test."));
    assert!(font.name.ends_with(".woff2"));
    assert!(!font.is_entry);
    assert_eq!(fs::read(&font.output_path).unwrap(), font_bytes);

    let css = read(bundle(&result.bundles, "index.css"));
    assert!(css.contains(&format!("url(\"{}\")", font.name)));
    assert!(!css.contains("./test.woff2"));
}

#[tokio::test]
async fn test_production_output_is_already_minified() {
    let dir = project();
    let root = dir.path();
    write(
        root,
        "src/index.js",
        "// entry\nimport \"./index.css\";\nconst pattern = /\\/\\//i;\n\nconsole.log(  pattern.test(\"//x\")  );\n",
    );
    write(root, "src/index.css", "/* base */\n.index {\n  color: red;\n}\n");

    let mut config = config(root, &["src/index.js"]);
    config.mode = Mode::Production;
    let options = BuildOptions::from_config(&config).unwrap();
    assert!(options.minify);

    let result = Assetpack::new(&config, options).unwrap().build().await.unwrap();

    let js = read(bundle(&result.bundles, "index.js"));
    assert!(!js.contains("// entry"));
    assert!(js.contains("/\\/\\//i"));
    assert_eq!(JsOptimizer::minify(&js), js);

    let css = read(bundle(&result.bundles, "index.css"));
    assert!(!css.contains("base"));
    assert!(css.contains(".index{color:red}"));
    assert_eq!(CssOptimizer::minify("index.css", &css).unwrap(), css);

    // Minified output has no line mappings left to point at
    assert!(!js.contains("sourceMappingURL"));
    assert!(result.bundles.iter().all(|b| b.sourcemap_path.is_none()));
    assert!(!root.join("dist").join("index.js.map").exists());
}

#[tokio::test]
async fn test_source_maps_point_back_at_source_lines() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./dep\";\n\nconsole.log(\"entry marker\");\n");
    write(root, "src/dep.js", "const x = 1;\nconsole.log(\"dep marker\", x);\n");

    let result = assetpack(root, &["src/index.js"]).build().await.unwrap();
    let info = bundle(&result.bundles, "index.js");
    let js = read(info);
    assert!(js.contains("//# sourceMappingURL=index.js.map"));

    let map_path = info.sourcemap_path.clone().unwrap();
    let map = sourcemap::SourceMap::from_slice(&fs::read(map_path).unwrap()).unwrap();

    for (marker, source, source_line) in [
        ("entry marker", "src/index.js", 2),
        ("dep marker", "src/dep.js", 1),
    ] {
        let line = js.lines().position(|l| l.contains(marker)).unwrap() as u32;
        let token = map.lookup_token(line, 0).unwrap();
        assert_eq!(token.get_source(), Some(source));
        assert_eq!(token.get_src_line(), source_line);
    }
}

#[tokio::test]
async fn test_missing_required_import_fails_the_build() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./missing\";\n");

    let mut build = assetpack(root, &["src/index.js"]);
    let failure = build.build().await.unwrap_err();

    assert!(failure.diagnostics.iter().any(|d| d.is_fatal()
        && matches!(&d.error, BuildError::Resolution { specifier, .. } if specifier == "./missing")));
    assert!(!root.join("dist").join("index.js").exists());

    // Creating the file makes the next rebuild succeed
    let missing = write(root, "src/missing.js", "module.exports = 1;\n");
    let result = build.rebuild(&[missing]).await.unwrap();
    assert_eq!(build.asset_graph().asset_count(), 2);
    assert!(bundle(&result.bundles, "index.js").output_path.is_file());
}

#[derive(Debug)]
struct PolyfillTransformer;

impl Transformer for PolyfillTransformer {
    fn name(&self) -> &str {
        "polyfill"
    }

    fn transform(
        &self,
        mut asset: Asset,
        _config: Option<&TransformerConfig>,
        _options: &BuildOptions,
    ) -> Result<Vec<TransformOutput>> {
        asset.add_dependency(DependencyOptions::new("./polyfill").optional());
        Ok(vec![TransformOutput::Asset(asset)])
    }
}

#[tokio::test]
async fn test_unresolved_optional_dependency_is_a_warning() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "module.exports = 1;\n");

    let mut catalog = PluginCatalog::builtin();
    catalog.add_transformer(Arc::new(PolyfillTransformer));
    let plugins = PluginsConfig {
        transformers: vec![GlobRule::new("*.js", &["polyfill", "js"])],
        ..Default::default()
    };
    let registry = PluginRegistry::new(&plugins, &catalog).unwrap();

    let config = config(root, &["src/index.js"]);
    let options = BuildOptions::from_config(&config).unwrap();
    let result = Assetpack::with_registry(registry, options)
        .unwrap()
        .build()
        .await
        .unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert!(!result.warnings[0].is_fatal());
    assert!(matches!(
        &result.warnings[0].error,
        BuildError::Resolution { specifier, .. } if specifier == "./polyfill"
    ));
    assert_eq!(result.stats.warnings, 1);
    assert_eq!(result.bundles.len(), 1);
}

#[tokio::test]
async fn test_import_cycles_are_bundled_once() {
    let dir = project();
    let root = dir.path();
    write(root, "src/a.js", "import \"./b\";\nmodule.exports = \"a\";\n");
    write(root, "src/b.js", "import \"./a\";\nmodule.exports = \"b\";\n");

    let mut build = assetpack(root, &["src/a.js"]);
    let result = build.build().await.unwrap();

    assert_eq!(build.asset_graph().asset_count(), 2);
    assert_eq!(result.bundles.len(), 1);
    assert_eq!(result.bundles[0].asset_paths.len(), 2);
}

#[tokio::test]
async fn test_dot_segment_imports_share_one_asset() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./a\";\nimport \"./sub/c\";\n");
    write(root, "src/sub/c.js", "import \"../a\";\nimport \"./../sub/./c\";\n");
    let a = write(root, "src/a.js", "module.exports = \"OLD\";\n");

    let mut build = assetpack(root, &["./src/./index.js"]);
    let result = build.build().await.unwrap();
    assert_eq!(build.asset_graph().asset_count(), 3);
    assert_eq!(result.bundles.len(), 1);
    assert_eq!(result.bundles[0].asset_paths.len(), 3);
    assert_eq!(result.bundles[0].name, "index.js");

    // A change reported under a dotted path still reaches the asset
    fs::write(&a, "module.exports = \"NEW\";\n").unwrap();
    let result = build
        .rebuild(&[root.join("src/sub/../a.js")])
        .await
        .unwrap();

    assert_eq!(build.asset_graph().asset_count(), 3);
    let contents = read(bundle(&result.bundles, "index.js"));
    assert!(contents.contains("NEW"));
    assert!(!contents.contains("OLD"));
}

#[tokio::test]
async fn test_broken_file_is_reported_once() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./data.json\";\nimport \"./other\";\n");
    write(root, "src/other.js", "import \"./data.json\";\n");
    let data = write(root, "src/data.json", "{ not json");

    let failure = assetpack(root, &["src/index.js"]).build().await.unwrap_err();

    let transform_errors: Vec<_> = failure
        .diagnostics
        .iter()
        .filter(|d| matches!(&d.error, BuildError::Transform { path, .. } if *path == data))
        .collect();
    assert_eq!(transform_errors.len(), 1);
    assert!(transform_errors[0].is_fatal());
}

#[tokio::test]
async fn test_rebuild_follows_added_and_removed_imports() {
    let dir = project();
    let root = dir.path();
    let index = write(root, "src/index.js", "import \"./a\";\n");
    write(root, "src/a.js", "module.exports = \"a\";\n");

    let mut build = assetpack(root, &["src/index.js"]);
    build.build().await.unwrap();
    assert_eq!(build.asset_graph().asset_count(), 2);

    write(root, "src/b.js", "module.exports = \"b\";\n");
    fs::write(&index, "import \"./a\";\nimport \"./b\";\n").unwrap();
    let result = build.rebuild(&[index.clone()]).await.unwrap();
    assert_eq!(build.asset_graph().asset_count(), 3);
    assert_eq!(result.stats.assets, 3);

    fs::write(&index, "import \"./b\";\n").unwrap();
    let result = build.rebuild(&[index.clone()]).await.unwrap();
    assert_eq!(build.asset_graph().asset_count(), 2);

    let paths = &bundle(&result.bundles, "index.js").asset_paths;
    assert!(paths.contains(&root.join("src/b.js")));
    assert!(!paths.contains(&root.join("src/a.js")));
    assert!(!read(bundle(&result.bundles, "index.js")).contains("\"a\""));
}

#[tokio::test]
async fn test_rebuild_updates_the_asset_graph_in_place() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import(\"./a\");\n");
    let a = write(root, "src/a.js", "module.exports = \"a\";\n");

    let mut build = assetpack(root, &["src/index.js"]);
    build.build().await.unwrap();
    let before = build.asset_graph() as *const _;

    fs::write(&a, "module.exports = \"b\";\n").unwrap();
    build.rebuild(&[a]).await.unwrap();

    assert!(std::ptr::eq(before, build.asset_graph()));
    assert!(std::ptr::eq(
        build.asset_graph(),
        build.bundle_graph().unwrap().asset_graph()
    ));
}

#[tokio::test]
async fn test_cache_survives_across_builds() {
    let dir = project();
    let root = dir.path();
    write(root, "src/index.js", "import \"./a\";\n");
    let a = write(root, "src/a.js", "module.exports = \"a\";\n");

    let mut config = config(root, &["src/index.js"]);
    config.cache.enabled = true;
    let fresh = || {
        let options = BuildOptions::from_config(&config).unwrap();
        Assetpack::new(&config, options).unwrap()
    };

    let cold = fresh().build().await.unwrap();
    assert_eq!(cold.stats.cache_hits, 0);
    assert!(root.join(".assetpack-cache").is_dir());

    let warm = fresh().build().await.unwrap();
    assert_eq!(warm.stats.cache_hits, 2);
    assert_eq!(read(&cold.bundles[0]), read(&warm.bundles[0]));

    fs::write(&a, "module.exports = \"changed\";\n").unwrap();
    let changed = fresh().build().await.unwrap();
    assert_eq!(changed.stats.cache_hits, 1);
    assert!(read(bundle(&changed.bundles, "index.js")).contains("changed"));
}
