//! Transform result cache
//!
//! Entries are keyed by (file path, environment, transformer config hash)
//! and hold every asset one file produced. An entry is only served after
//! each of its connected files still hashes to the recorded value; a
//! mismatch turns the lookup into a miss. Entries are replaced, never
//! edited. The cache is owned by the graph coordinator, so it needs no
//! locking.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::BuildError;
use crate::transform::TransformOutcome;
use crate::types::{Asset, File};
use crate::utils::{hash_content, hash_parts};

/// The stored result of transforming one file in one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub file_path: PathBuf,
    pub env: Environment,

    /// Content hash of the source file when the entry was created
    pub hash: String,
    pub config_hash: String,

    /// Assets after post-processing; the file's own asset comes first
    pub assets: Vec<Asset>,

    /// Assets before post-processing
    pub initial_assets: Vec<Asset>,

    /// The source file and every other file the result depends on
    pub connected_files: Vec<File>,
}

impl CacheEntry {
    pub fn from_outcome(
        key: String,
        file_path: PathBuf,
        env: Environment,
        config_hash: String,
        outcome: TransformOutcome,
    ) -> Self {
        Self {
            key,
            file_path,
            env,
            hash: outcome.hash,
            config_hash,
            assets: outcome.assets,
            initial_assets: outcome.initial_assets,
            connected_files: outcome.connected_files,
        }
    }

    /// Whether `path` affects this entry
    pub fn depends_on(&self, path: &Path) -> bool {
        self.file_path == path || self.connected_files.iter().any(|f| f.path == path)
    }

    /// Check every connected file against its recorded hash
    fn verify(&self) -> Result<(), BuildError> {
        for file in &self.connected_files {
            let Some(expected) = &file.hash else {
                continue;
            };
            let stale = match fs::read(&file.path) {
                Ok(content) => hash_content(&content) != *expected,
                Err(_) => true,
            };
            if stale {
                return Err(BuildError::CacheInconsistency {
                    path: file.path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Content-hash keyed store of transform results
#[derive(Debug, Default)]
pub struct ContentCache {
    /// Persistence directory; in-memory only when `None`
    dir: Option<PathBuf>,
    entries: HashMap<String, CacheEntry>,
    dirty: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl ContentCache {
    /// A cache that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a persistent cache, loading whatever entries are readable
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut entries = HashMap::new();

        if dir.is_dir() {
            for entry in fs::read_dir(&dir)
                .with_context(|| format!("Failed to read cache directory {}", dir.display()))?
            {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                let parsed = fs::read(&path)
                    .ok()
                    .and_then(|content| serde_json::from_slice::<CacheEntry>(&content).ok());
                match parsed {
                    Some(entry) => {
                        entries.insert(entry.key.clone(), entry);
                    }
                    None => warn!("Ignoring unreadable cache entry {}", path.display()),
                }
            }
        }

        debug!("Loaded {} cache entries from {}", entries.len(), dir.display());

        Ok(Self {
            dir: Some(dir),
            entries,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    /// Cache key for transforming `file_path` in `env` with the given config
    pub fn key(file_path: &Path, env: &Environment, config_hash: &str) -> String {
        hash_parts([
            file_path.to_string_lossy().as_ref(),
            env.id().as_str(),
            config_hash,
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a valid entry.
    ///
    /// A stale entry is dropped and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        let verified = self.entries.get(key).map(CacheEntry::verify)?;

        if let Err(e) = verified {
            debug!("{}", e);
            self.remove(key);
            return None;
        }

        self.entries.get(key)
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.removed.remove(&entry.key);
        self.dirty.insert(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Drop every entry that depends on `path`; returns the dropped keys
    pub fn invalidate_path(&mut self, path: &Path) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.depends_on(path))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();

        for key in &keys {
            self.remove(key);
        }
        if !keys.is_empty() {
            debug!("Invalidated {} cache entries for {}", keys.len(), path.display());
        }

        keys
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.dirty.remove(key);
            self.removed.insert(key.to_string());
        }
    }

    /// Write new entries and delete dropped ones
    pub fn flush(&mut self) -> Result<()> {
        let Some(dir) = &self.dir else {
            self.dirty.clear();
            self.removed.clear();
            return Ok(());
        };

        if !self.dirty.is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        }

        for key in &self.dirty {
            if let Some(entry) = self.entries.get(key) {
                let path = dir.join(format!("{}.json", key));
                let json = serde_json::to_vec(entry)?;
                fs::write(&path, json)
                    .with_context(|| format!("Failed to write cache entry {}", path.display()))?;
            }
        }

        for key in &self.removed {
            let path = dir.join(format!("{}.json", key));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove cache entry {}", path.display()))?;
            }
        }

        debug!(
            "Flushed cache: {} written, {} removed",
            self.dirty.len(),
            self.removed.len()
        );
        self.dirty.clear();
        self.removed.clear();
        Ok(())
    }
}
