//! Module resolution
//!
//! Maps a dependency specifier to a file on disk. The core only talks to
//! the [`Resolver`] trait; [`FileResolver`] is the built-in implementation.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::types::Dependency;
use crate::utils::clean_path;

/// Resolver plugin contract.
///
/// Returns `Ok(None)` when the specifier cannot be found; the caller decides
/// whether that is fatal based on the dependency's flags.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, dependency: &Dependency, root_dir: &Path) -> Result<Option<PathBuf>>;
}

const EXTENSIONS: [&str; 7] = ["js", "mjs", "cjs", "jsx", "json", "css", "ts"];

/// Node-style file resolver
#[derive(Debug, Default)]
pub struct FileResolver;

impl FileResolver {
    pub fn new() -> Self {
        Self
    }

    /// Specifiers that point outside the build and are never bundled
    fn is_external(specifier: &str) -> bool {
        specifier.starts_with("data:")
            || specifier.starts_with("http:")
            || specifier.starts_with("https:")
            || specifier.starts_with("//")
            || specifier.starts_with('#')
    }

    /// Resolve a relative import
    fn resolve_relative(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        let target = clean_path(&base_dir.join(specifier));

        // Try exact path first
        if target.is_file() {
            return Some(target);
        }

        // Try adding extensions
        let as_string = target.to_string_lossy();
        for ext in &EXTENSIONS {
            let with_ext = PathBuf::from(format!("{}.{}", as_string, ext));
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        // Try as directory with index file
        if target.is_dir() {
            for ext in &EXTENSIONS {
                let index = target.join(format!("index.{}", ext));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Resolve a bare import (from node_modules)
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Result<Option<PathBuf>> {
        let mut current = from.to_path_buf();

        // Walk up directory tree looking for node_modules
        loop {
            let node_modules = current.join("node_modules");

            if node_modules.is_dir() {
                if let Some(resolved) = self.resolve_in_node_modules(&node_modules, specifier)? {
                    return Ok(Some(resolved));
                }
            }

            if !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve a module within a node_modules directory
    fn resolve_in_node_modules(
        &self,
        node_modules: &Path,
        specifier: &str,
    ) -> Result<Option<PathBuf>> {
        // Split specifier into package name and subpath
        let (package_name, subpath) = if specifier.starts_with('@') {
            // Scoped package: @scope/name or @scope/name/subpath
            let parts: Vec<&str> = specifier.splitn(3, '/').collect();
            if parts.len() < 2 {
                return Ok(None);
            }
            let name = format!("{}/{}", parts[0], parts[1]);
            (name, parts.get(2).map(|s| s.to_string()))
        } else {
            let parts: Vec<&str> = specifier.splitn(2, '/').collect();
            (parts[0].to_string(), parts.get(1).map(|s| s.to_string()))
        };

        let package_dir = node_modules.join(&package_name);

        if !package_dir.is_dir() {
            return Ok(None);
        }

        if let Some(sub) = subpath {
            return Ok(self.resolve_relative(&sub, &package_dir));
        }

        let package_json = package_dir.join("package.json");

        if package_json.is_file() {
            let content = fs::read_to_string(&package_json)
                .with_context(|| format!("Failed to read {}", package_json.display()))?;
            let pkg: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", package_json.display()))?;

            // Try module field first (ESM), then main
            for field in ["module", "main"] {
                if let Some(entry) = pkg.get(field).and_then(|v| v.as_str()) {
                    if let Some(resolved) = self.resolve_relative(entry, &package_dir) {
                        return Ok(Some(resolved));
                    }
                }
            }
        }

        Ok(self.resolve_relative("index", &package_dir))
    }
}

impl Resolver for FileResolver {
    fn name(&self) -> &str {
        "default"
    }

    fn resolve(&self, dependency: &Dependency, root_dir: &Path) -> Result<Option<PathBuf>> {
        let specifier = dependency.specifier.as_str();
        debug!("Resolving '{}'", specifier);

        if Self::is_external(specifier) {
            debug!("Skipping external specifier: {}", specifier);
            return Ok(None);
        }

        let base_dir = dependency
            .source_path
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(root_dir);

        let resolved = if Path::new(specifier).is_absolute() && Path::new(specifier).exists() {
            Some(clean_path(Path::new(specifier)))
        } else if let Some(root_relative) = specifier.strip_prefix('/') {
            self.resolve_relative(root_relative, root_dir)
        } else if specifier.starts_with('.') || dependency.is_entry || dependency.is_url {
            self.resolve_relative(specifier, base_dir)
        } else if dependency.env.include_node_modules {
            self.resolve_bare(specifier, base_dir)?
        } else {
            debug!("Skipping bare specifier: {}", specifier);
            None
        };

        debug!("Resolved to: {:?}", resolved);

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::types::DependencyOptions;

    fn dependency(specifier: &str, from: &Path) -> Dependency {
        Dependency::from_options(
            DependencyOptions::new(specifier),
            "asset",
            from.to_path_buf(),
            &Environment::default(),
        )
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_resolves_relative_with_extension_probing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/index.js"), "");
        write(&root.join("src/local.js"), "");
        write(&root.join("src/styles/local.module.css"), "");
        write(&root.join("src/lib/index.js"), "");

        let resolver = FileResolver::new();
        let from = root.join("src/index.js");

        assert_eq!(
            resolver.resolve(&dependency("./local", &from), root).unwrap(),
            Some(root.join("src/local.js"))
        );
        assert_eq!(
            resolver.resolve(&dependency("./styles/local.module", &from), root).unwrap(),
            Some(root.join("src/styles/local.module.css"))
        );
        assert_eq!(
            resolver.resolve(&dependency("./lib", &from), root).unwrap(),
            Some(root.join("src/lib/index.js"))
        );
        assert_eq!(resolver.resolve(&dependency("./missing", &from), root).unwrap(), None);
    }

    #[test]
    fn test_dot_segments_resolve_to_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/a.js"), "");
        write(&root.join("src/b.js"), "");
        write(&root.join("src/sub/c.js"), "");

        let resolver = FileResolver::new();
        let from_index = root.join("src/index.js");
        let from_sub = root.join("src/sub/c.js");

        assert_eq!(
            resolver.resolve(&dependency("./b", &from_index), root).unwrap(),
            Some(root.join("src/b.js"))
        );
        assert_eq!(
            resolver.resolve(&dependency("./sub/../a.js", &from_index), root).unwrap(),
            Some(root.join("src/a.js"))
        );
        assert_eq!(
            resolver.resolve(&dependency("../a", &from_sub), root).unwrap(),
            Some(root.join("src/a.js"))
        );
        assert_eq!(
            resolver.resolve(&dependency("/src/./sub/../b", &from_sub), root).unwrap(),
            Some(root.join("src/b.js"))
        );
    }

    #[test]
    fn test_resolves_packages_from_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/index.js"), "");
        write(
            &root.join("node_modules/pkg/package.json"),
            r#"{"name": "pkg", "main": "lib/main.js"}"#,
        );
        write(&root.join("node_modules/pkg/lib/main.js"), "");
        write(&root.join("node_modules/@scope/ui/button.js"), "");

        let resolver = FileResolver::new();
        let from = root.join("src/index.js");

        assert_eq!(
            resolver.resolve(&dependency("pkg", &from), root).unwrap(),
            Some(root.join("node_modules/pkg/lib/main.js"))
        );
        assert_eq!(
            resolver.resolve(&dependency("@scope/ui/button", &from), root).unwrap(),
            Some(root.join("node_modules/@scope/ui/button.js"))
        );
    }

    #[test]
    fn test_external_urls_are_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileResolver::new();
        let from = dir.path().join("index.css");

        for specifier in ["http://google.com", "data:image/gif;base64,quotes", "#anchor"] {
            assert_eq!(
                resolver.resolve(&dependency(specifier, &from), dir.path()).unwrap(),
                None
            );
        }
    }
}
