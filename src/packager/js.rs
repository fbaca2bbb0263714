use anyhow::{Context, Result};

use crate::bundler::{Bundle, BundleGraph};
use crate::config::BuildOptions;
use crate::types::Asset;

use super::{resolve_bundle_urls, source_map, MappedSection, PackagedBundle, Packager};

const GLOBAL: &str =
    r#"typeof globalThis !== "undefined" ? globalThis : typeof self !== "undefined" ? self : this"#;

/// Module registry shared by every bundle loaded into the same global scope
const PRELUDE: &str = r#"(function (global) {
  if (global.__assetpack_require__) {
    return;
  }

  var modules = {};
  var cache = {};

  function load(id) {
    if (cache[id]) {
      return cache[id].exports;
    }
    var definition = modules[id];
    if (!definition) {
      throw new Error("Cannot find module " + id);
    }

    var module = { exports: {} };
    cache[id] = module;
    definition[0].call(module.exports, module, module.exports, localRequire(definition[1]));
    return module.exports;
  }

  function localRequire(dependencies) {
    function require(specifier) {
      var id = dependencies[specifier];
      if (id === undefined) {
        throw new Error("Cannot resolve '" + specifier + "'");
      }
      return id === null ? {} : load(id);
    }
    require.lazy = function (specifier) {
      return Promise.resolve().then(function () {
        return require(specifier);
      });
    };
    return require;
  }

  global.__assetpack_define__ = function (id, factory, dependencies) {
    modules[id] = [factory, dependencies];
  };
  global.__assetpack_require__ = load;
})"#;

/// Wraps each asset in a registry definition keyed by asset id
#[derive(Debug, Default)]
pub struct JsPackager;

impl JsPackager {
    pub fn new() -> Self {
        Self
    }

    /// The registry id a dependency maps to, or `None` for an empty module
    fn dependency_target(dependency_id: &str, bundle_graph: &BundleGraph) -> Option<String> {
        if let Some(runtime) = bundle_graph.dependency_runtime(dependency_id) {
            return Some(runtime.id.clone());
        }

        let target = bundle_graph.resolve_dependency(dependency_id)?;
        if target.asset_type == "js" {
            return Some(target.id.clone());
        }

        // Non-script assets are only visible to scripts through a script child
        let graph = bundle_graph.asset_graph();
        let node = graph.asset_node(&target.id)?;
        graph
            .children_of(node)
            .into_iter()
            .filter_map(|child| graph.asset(child))
            .find(|child| child.asset_type == "js")
            .map(|child| child.id.clone())
    }

    fn dependency_map(asset: &Asset, bundle_graph: &BundleGraph) -> Result<String> {
        let mut entries = Vec::new();
        for dependency in &asset.dependencies {
            let target = match Self::dependency_target(&dependency.id, bundle_graph) {
                Some(id) => serde_json::to_string(&id)?,
                None => "null".to_string(),
            };
            entries.push(format!("{}: {}", serde_json::to_string(&dependency.specifier)?, target));
        }
        Ok(format!("{{{}}}", entries.join(", ")))
    }
}

impl Packager for JsPackager {
    fn name(&self) -> &str {
        "js"
    }

    fn package(
        &self,
        bundle: &Bundle,
        bundle_graph: &BundleGraph,
        options: &BuildOptions,
    ) -> Result<PackagedBundle> {
        let mut output = format!("{}({});\n", PRELUDE, GLOBAL);
        output.push_str("(function (define) {\n");
        let mut line = output.matches('\n').count();
        let mut sections = Vec::new();

        for asset_id in &bundle.assets {
            let asset = bundle_graph
                .asset(asset_id)
                .with_context(|| format!("Bundle {} lists unknown asset {}", bundle.id, asset_id))?;
            let code = asset.output.code.as_str()?.trim_end();

            let definition = format!(
                "define({}, function (module, exports, require) {{\n{}\n}}, {});\n",
                serde_json::to_string(&asset.id)?,
                code,
                Self::dependency_map(asset, bundle_graph)?
            );
            // Code starts on the line after `define(`
            sections.push(MappedSection::new(asset, line + 1, code));
            line += definition.matches('\n').count();
            output.push_str(&definition);
        }
        output.push_str(&format!("}})(({}).__assetpack_define__);\n", GLOBAL));

        if bundle.is_entry {
            if let Some(main) = &bundle.main_entry {
                output.push_str(&format!(
                    "({}).__assetpack_require__({});\n",
                    GLOBAL,
                    serde_json::to_string(main)?
                ));
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
