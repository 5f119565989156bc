//! Index manifest for tracking indexed files and their state.
//!
//! The manifest is the single source of truth for "did this file change".
//! Keys are repo-relative paths with forward slashes, kept in a `BTreeMap`
//! so the serialized form is stable between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SCHEMA_VERSION;

/// Manifest tracking the state of indexed files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Version of the manifest format
    pub schema_version: u32,

    /// Map of repo-relative path to file state
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// State of an indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,

    /// SHA256 hash of the whole file
    pub content_hash: String,

    /// Unix seconds; informational only
    pub mtime: i64,

    pub size: u64,

    /// Chunks this file was split into, in line order
    pub chunk_ids: Vec<String>,

    /// RFC 3339 time the file was last chunked
    #[serde(default)]
    pub last_indexed: String,
}

impl IndexManifest {
    /// Create a new empty manifest.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            files: BTreeMap::new(),
        }
    }

    /// Load manifest from a file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(ManifestError::Io)?;
        serde_json::from_str(&content).map_err(ManifestError::Parse)
    }

    pub fn get(&self, path: &str) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Check if a file needs re-indexing.
    pub fn needs_update(&self, path: &str, current_hash: &str) -> bool {
        match self.files.get(path) {
            Some(state) => state.content_hash != current_hash,
            None => true,
        }
    }

    /// Record that a file was (re)chunked, replacing any previous state.
    pub fn record_indexed(&mut self, state: FileState) -> Option<FileState> {
        self.files.insert(state.path.clone(), state)
    }

    /// Refresh stat metadata for a file whose content did not change.
    pub fn touch(&mut self, path: &str, mtime: i64, size: u64) {
        if let Some(state) = self.files.get_mut(path) {
            state.mtime = mtime;
            state.size = size;
        }
    }

    /// Remove a file from the manifest.
    pub fn remove_file(&mut self, path: &str) -> Option<FileState> {
        self.files.remove(path)
    }

    /// Files in the manifest that are not in `current_files`, sorted.
    pub fn find_deleted_files(&self, current_files: &BTreeSet<String>) -> Vec<String> {
        self.files
            .keys()
            .filter(|p| !current_files.contains(*p))
            .cloned()
            .collect()
    }

    /// Every chunk id referenced by the manifest.
    pub fn all_chunk_ids(&self) -> BTreeSet<String> {
        self.files
            .values()
            .flat_map(|s| s.chunk_ids.iter().cloned())
            .collect()
    }
}

/// File-level difference between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ManifestDiff {
    /// Compare two manifest snapshots. Paths come out sorted.
    pub fn between(old: &IndexManifest, new: &IndexManifest) -> Self {
        let mut diff = Self::default();
        for (path, state) in &new.files {
            match old.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(prev) if prev.content_hash != state.content_hash => {
                    diff.changed.push(path.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = old
            .files
            .keys()
            .filter(|p| !new.files.contains_key(*p))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Errors that can occur when working with manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    Parse(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(path: &str, hash: &str, chunks: &[&str]) -> FileState {
        FileState {
            path: path.to_string(),
            content_hash: hash.to_string(),
            mtime: 1,
            size: 10,
            chunk_ids: chunks.iter().map(|c| c.to_string()).collect(),
            last_indexed: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_manifest_new() {
        let manifest = IndexManifest::new();
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);
        assert!(manifest.is_empty());
        assert!(manifest.all_chunk_ids().is_empty());
    }

    #[test]
    fn test_needs_update() {
        let mut manifest = IndexManifest::new();

        // New file needs update
        assert!(manifest.needs_update("test.rs", "hash1"));

        manifest.record_indexed(state("test.rs", "hash1", &["c1"]));

        assert!(!manifest.needs_update("test.rs", "hash1"));
        assert!(manifest.needs_update("test.rs", "hash2"));
    }

    #[test]
    fn test_record_indexed_replaces_existing() {
        let mut manifest = IndexManifest::new();
        manifest.record_indexed(state("test.rs", "hash1", &["c1", "c2"]));
        let previous = manifest.record_indexed(state("test.rs", "hash2", &["c3", "c4", "c5"]));

        assert_eq!(previous.unwrap().chunk_ids, vec!["c1", "c2"]);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.all_chunk_ids().len(), 3);
        assert_eq!(manifest.get("test.rs").unwrap().content_hash, "hash2");
    }

    #[test]
    fn test_touch_keeps_hash_and_chunks() {
        let mut manifest = IndexManifest::new();
        manifest.record_indexed(state("a.rs", "h", &["c1"]));
        manifest.touch("a.rs", 99, 42);

        let entry = manifest.get("a.rs").unwrap();
        assert_eq!((entry.mtime, entry.size), (99, 42));
        assert_eq!(entry.content_hash, "h");
        assert_eq!(entry.last_indexed, "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_remove_file() {
        let mut manifest = IndexManifest::new();
        manifest.record_indexed(state("a.rs", "hash_a", &["c1", "c2"]));
        manifest.record_indexed(state("b.rs", "hash_b", &["c3"]));

        let removed = manifest.remove_file("a.rs");
        assert_eq!(removed.unwrap().chunk_ids.len(), 2);
        assert_eq!(manifest.all_chunk_ids().len(), 1);
        assert!(manifest.get("a.rs").is_none());
        assert!(manifest.remove_file("nonexistent.rs").is_none());
    }

    #[test]
    fn test_find_deleted_files() {
        let mut manifest = IndexManifest::new();
        manifest.record_indexed(state("a.rs", "h1", &[]));
        manifest.record_indexed(state("b.rs", "h2", &[]));
        manifest.record_indexed(state("c.rs", "h3", &[]));

        let current = |paths: &[&str]| -> BTreeSet<String> {
            paths.iter().map(|p| p.to_string()).collect()
        };
        let deleted = manifest.find_deleted_files(&current(&["a.rs", "c.rs"]));
        assert_eq!(deleted, vec!["b.rs".to_string()]);
        assert!(manifest
            .find_deleted_files(&current(&["a.rs", "b.rs", "c.rs"]))
            .is_empty());
    }

    #[test]
    fn test_manifest_load() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let mut manifest = IndexManifest::new();
        manifest.record_indexed(state("src/main.rs", "abc123", &["chunk1", "chunk2"]));
        manifest.record_indexed(state("src/lib.rs", "def456", &["chunk3"]));

        std::fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        let loaded = IndexManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.all_chunk_ids().len(), 3);
    }

    #[test]
    fn test_serialization_is_stable() {
        let mut a = IndexManifest::new();
        a.record_indexed(state("z.rs", "1", &["c"]));
        a.record_indexed(state("a.rs", "2", &["d"]));
        let mut b = IndexManifest::new();
        b.record_indexed(state("a.rs", "2", &["d"]));
        b.record_indexed(state("z.rs", "1", &["c"]));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_manifest_load_nonexistent() {
        let result = IndexManifest::load(Path::new("/nonexistent/path/manifest.json"));
        assert!(matches!(result, Err(ManifestError::Io(_))));
    }

    #[test]
    fn test_manifest_diff() {
        let mut old = IndexManifest::new();
        old.record_indexed(state("kept.rs", "same", &[]));
        old.record_indexed(state("edited.rs", "v1", &[]));
        old.record_indexed(state("gone.rs", "x", &[]));

        let mut new = IndexManifest::new();
        new.record_indexed(state("kept.rs", "same", &[]));
        new.record_indexed(state("edited.rs", "v2", &[]));
        new.record_indexed(state("fresh.rs", "y", &[]));

        let diff = ManifestDiff::between(&old, &new);
        assert_eq!(diff.added, vec!["fresh.rs"]);
        assert_eq!(diff.removed, vec!["gone.rs"]);
        assert_eq!(diff.changed, vec!["edited.rs"]);
        assert!(ManifestDiff::between(&new, &new).is_empty());
    }
}
