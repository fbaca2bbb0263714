use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::environment::{Environment, EnvironmentOptions, Target};
use crate::utils::hash_parts;

/// Arbitrary JSON metadata carried by assets and dependencies
pub type Meta = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_path: PathBuf,
    pub start: Position,
    pub end: Position,
}

/// A request to resolve a specifier from a source asset.
///
/// The id is derived from the source asset, specifier, environment and target,
/// so two requests for the same thing from the same place are the same node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,

    /// The specifier as written in the source, e.g. `./local.css`
    pub specifier: String,

    /// Id of the asset that emitted this dependency; `None` for entries
    pub source_asset_id: Option<String>,

    /// File path of the emitting asset, used as the resolution base
    pub source_path: Option<PathBuf>,

    /// Dynamic `import()` or other lazy load
    pub is_async: bool,

    pub is_entry: bool,

    /// Failure to resolve is a warning instead of an error
    pub is_optional: bool,

    /// Referenced by URL (e.g. `url()` in CSS) rather than executed
    pub is_url: bool,

    pub loc: Option<SourceLocation>,

    pub env: Environment,

    #[serde(default)]
    pub meta: Meta,

    pub target: Option<Target>,
}

impl Dependency {
    /// Create the top-level dependency for an entry file
    pub fn entry(specifier: impl Into<String>, target: Target) -> Self {
        let specifier = specifier.into();
        let env = target.env.clone();
        let id = dependency_id(None, &specifier, &env, Some(&target));

        Self {
            id,
            specifier,
            source_asset_id: None,
            source_path: None,
            is_async: false,
            is_entry: true,
            is_optional: false,
            is_url: false,
            loc: None,
            env,
            meta: Meta::new(),
            target: Some(target),
        }
    }

    /// Create a dependency emitted by an asset
    pub fn from_options(
        options: DependencyOptions,
        source_asset_id: &str,
        source_path: PathBuf,
        source_env: &Environment,
    ) -> Self {
        let env = match &options.env {
            Some(env) => source_env.merge(env),
            None => source_env.clone(),
        };
        let id = dependency_id(
            Some(source_asset_id),
            &options.specifier,
            &env,
            options.target.as_ref(),
        );

        Self {
            id,
            specifier: options.specifier,
            source_asset_id: Some(source_asset_id.to_string()),
            source_path: Some(source_path),
            is_async: options.is_async,
            is_entry: options.is_entry,
            is_optional: options.is_optional,
            is_url: options.is_url,
            loc: options.loc,
            env,
            meta: options.meta,
            target: options.target,
        }
    }

    /// Fold a duplicate request for the same specifier into this one.
    ///
    /// A specifier imported both statically and dynamically stays static, and
    /// stays required if any import of it is required.
    pub fn merge(&mut self, other: &Dependency) {
        self.is_async &= other.is_async;
        self.is_optional &= other.is_optional;
        self.is_url |= other.is_url;
        for (key, value) in &other.meta {
            self.meta.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

fn dependency_id(
    source_asset_id: Option<&str>,
    specifier: &str,
    env: &Environment,
    target: Option<&Target>,
) -> String {
    hash_parts([
        source_asset_id.unwrap_or(""),
        specifier,
        env.id().as_str(),
        target.map(|t| t.name.as_str()).unwrap_or(""),
    ])
}

/// What a transformer declares when it finds an import
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyOptions {
    pub specifier: String,
    pub is_async: bool,
    pub is_entry: bool,
    pub is_optional: bool,
    pub is_url: bool,
    pub loc: Option<SourceLocation>,
    pub env: Option<EnvironmentOptions>,
    pub meta: Meta,
    pub target: Option<Target>,
}

impl DependencyOptions {
    pub fn new(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            ..Self::default()
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn url(mut self) -> Self {
        self.is_url = true;
        self
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }
}
