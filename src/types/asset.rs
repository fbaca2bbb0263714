use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::environment::{Environment, EnvironmentOptions};
use crate::utils::hash_parts;

use super::{Ast, Code, Dependency, DependencyOptions, Meta};

/// A watched file; a change to it invalidates whatever declared it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct File {
    pub path: PathBuf,
    pub hash: Option<String>,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, hash: Option<String>) -> Self {
        Self {
            path: path.into(),
            hash,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub time_ms: u64,
    pub size: usize,
}

/// What an asset contributes to a bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetOutput {
    pub code: Code,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,

    /// Auxiliary named payloads
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blobs: BTreeMap<String, Code>,
}

/// A transformed unit of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Hash of file path, environment and pipeline stage
    pub id: String,

    /// Content hash of the code the asset was created from
    pub hash: String,

    pub file_path: PathBuf,

    /// Declared type, usually the output extension (`js`, `css`, `woff2`)
    pub asset_type: String,

    /// Working code, rewritten by transformers
    pub code: Code,

    /// Parsed representation; only valid within one pipeline run
    #[serde(skip)]
    pub ast: Option<Ast>,

    /// Emitted dependencies, in first-emitted order
    pub dependencies: Vec<Dependency>,

    pub connected_files: Vec<File>,

    pub output: AssetOutput,

    pub output_hash: String,

    pub env: Environment,

    #[serde(default)]
    pub meta: Meta,

    pub stats: Stats,

    /// Distinguishes assets created from the same file by one transform
    pub unique_key: Option<String>,
}

impl Asset {
    pub fn new(file_path: impl Into<PathBuf>, env: Environment, code: Code) -> Self {
        let file_path = file_path.into();
        let asset_type = extension_of(&file_path);
        let id = asset_id(&file_path, &env, None);

        Self {
            id,
            hash: code.hash(),
            file_path,
            asset_type,
            code,
            ast: None,
            dependencies: Vec::new(),
            connected_files: Vec::new(),
            output: AssetOutput::default(),
            output_hash: String::new(),
            env,
            meta: Meta::new(),
            stats: Stats::default(),
            unique_key: None,
        }
    }

    /// Declare a dependency; a repeated specifier is merged into the first one
    pub fn add_dependency(&mut self, options: DependencyOptions) -> String {
        let dependency =
            Dependency::from_options(options, &self.id, self.file_path.clone(), &self.env);
        let id = dependency.id.clone();

        match self.dependencies.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.merge(&dependency),
            None => self.dependencies.push(dependency),
        }

        id
    }

    pub fn add_connected_file(&mut self, file: File) {
        if !self.connected_files.iter().any(|f| f.path == file.path) {
            self.connected_files.push(file);
        }
    }

    pub fn dependency(&self, id: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.id == id)
    }

    /// Turn a draft produced while transforming this asset into a sibling asset
    pub fn create_child(&self, draft: AssetDraft, index: usize) -> Asset {
        let unique_key = draft
            .unique_key
            .unwrap_or_else(|| format!("{}:{}", draft.asset_type, index));
        let env = match &draft.env {
            Some(options) => self.env.merge(options),
            None => self.env.clone(),
        };
        let code = draft.code.unwrap_or_default();

        let mut child = Asset {
            id: asset_id(&self.file_path, &env, Some(&unique_key)),
            hash: code.hash(),
            file_path: self.file_path.clone(),
            asset_type: draft.asset_type,
            code,
            ast: draft.ast,
            dependencies: Vec::new(),
            connected_files: self.connected_files.clone(),
            output: AssetOutput::default(),
            output_hash: String::new(),
            env,
            meta: draft.meta,
            stats: Stats::default(),
            unique_key: Some(unique_key),
        };

        for dependency in draft.dependencies {
            child.add_dependency(dependency);
        }
        for file in draft.connected_files {
            child.add_connected_file(file);
        }

        child
    }

    /// Fill in the output payload from the final working code
    pub fn finalize(&mut self, output: Option<AssetOutput>) {
        let output = output.unwrap_or_else(|| AssetOutput {
            code: self.code.clone(),
            map: None,
            blobs: BTreeMap::new(),
        });
        self.output_hash = output.code.hash();
        self.stats.size = output.code.size();
        self.output = output;
        self.ast = None;
    }

    /// Display name used in logs and bundle listings
    pub fn display_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// A description of an asset a transformer wants created.
///
/// Drafts become child assets of the asset being transformed.
#[derive(Debug, Clone, Default)]
pub struct AssetDraft {
    pub asset_type: String,
    pub code: Option<Code>,
    pub ast: Option<Ast>,
    pub dependencies: Vec<DependencyOptions>,
    pub connected_files: Vec<File>,
    pub env: Option<EnvironmentOptions>,
    pub meta: Meta,
    pub unique_key: Option<String>,
}

impl AssetDraft {
    pub fn new(asset_type: impl Into<String>, code: impl Into<Code>) -> Self {
        Self {
            asset_type: asset_type.into(),
            code: Some(code.into()),
            ..Self::default()
        }
    }
}

fn asset_id(file_path: &Path, env: &Environment, unique_key: Option<&str>) -> String {
    hash_parts([
        file_path.to_string_lossy().as_ref(),
        env.id().as_str(),
        unique_key.unwrap_or(""),
    ])
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
