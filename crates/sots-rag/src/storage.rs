//! Persistence of index artifacts.
//!
//! The four artifacts (manifest, chunk records, BM25 snapshot, vector
//! snapshot) are written together after a run, each through a temporary
//! file in the same directory followed by a rename. Loading never fails on
//! bad content: a corrupt artifact comes back empty and is reported so the
//! caller can force a full rebuild.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::manifest::IndexManifest;
use crate::search::{BM25Index, Bm25Snapshot, VectorSnapshot, VectorStore};
use crate::{BM25_FILE, CHUNKS_FILE, MANIFEST_FILE, REPORT_FILE, RUN_LOG_FILE, VECTOR_FILE};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {name}: {source}")]
    Serialize {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Locations of every file in an index directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub dir: PathBuf,
    pub manifest: PathBuf,
    pub chunks: PathBuf,
    pub bm25: PathBuf,
    pub vectors: PathBuf,
    pub report: PathBuf,
    pub run_log: PathBuf,
}

impl IndexPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            manifest: dir.join(MANIFEST_FILE),
            chunks: dir.join(CHUNKS_FILE),
            bm25: dir.join(BM25_FILE),
            vectors: dir.join(VECTOR_FILE),
            report: dir.join(REPORT_FILE),
            run_log: dir.join(RUN_LOG_FILE),
            dir,
        }
    }

    /// `rag_query_<ts>.<ext>` in the index directory.
    pub fn query_output(&self, timestamp: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("rag_query_{}.{}", timestamp, ext))
    }
}

/// Write `bytes` to `path` via a sibling temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&temp_path).map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::io(path, e)
    })
}

fn to_json<T: Serialize>(name: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string_pretty(value).map_err(|source| StorageError::Serialize { name, source })
}

/// The in-memory state of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexArtifacts {
    pub manifest: IndexManifest,
    pub chunks: BTreeMap<String, Chunk>,
    pub bm25: BM25Index,
    pub vectors: VectorStore,
}

impl IndexArtifacts {
    /// Whether every chunk the manifest references is present in the chunk
    /// map, the BM25 index and the vector store, and nothing else is.
    pub fn is_consistent(&self) -> bool {
        let referenced = self.manifest.all_chunk_ids();
        referenced.len() == self.chunks.len()
            && referenced.len() == self.bm25.len()
            && referenced.len() == self.vectors.len()
            && referenced
                .iter()
                .all(|id| self.chunks.contains_key(id) && self.bm25.contains(id) && self.vectors.contains(id))
    }
}

/// Result of reading an index directory.
#[derive(Debug, Default)]
pub struct LoadedIndex {
    pub artifacts: IndexArtifacts,
    /// Artifact file names that existed but could not be parsed
    pub corrupt: Vec<&'static str>,
    /// Artifact file names that did not exist
    pub missing: Vec<&'static str>,
}

impl LoadedIndex {
    pub fn is_fresh(&self) -> bool {
        self.missing.len() == 4
    }
}

enum Read<T> {
    Missing,
    Corrupt(String),
    Ok(T),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Read<T> {
    match fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Read::Missing,
        Err(e) => Read::Corrupt(e.to_string()),
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => Read::Ok(value),
            Err(e) => Read::Corrupt(e.to_string()),
        },
    }
}

fn read_chunks(path: &Path) -> Read<BTreeMap<String, Chunk>> {
    let content = match fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Read::Missing,
        Err(e) => return Read::Corrupt(e.to_string()),
        Ok(content) => content,
    };
    let mut chunks = BTreeMap::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Chunk>(line) {
            Ok(chunk) => {
                chunks.insert(chunk.chunk_id.clone(), chunk);
            }
            Err(e) => return Read::Corrupt(format!("line {}: {}", n + 1, e)),
        }
    }
    Read::Ok(chunks)
}

/// Reads and writes the artifacts of one index directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: IndexPaths,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: IndexPaths::new(dir),
        }
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Load whatever is on disk. Corrupt or missing artifacts load empty.
    pub fn load(&self) -> LoadedIndex {
        let mut loaded = LoadedIndex::default();

        fn settle<T: Default>(
            result: Read<T>,
            name: &'static str,
            loaded: &mut LoadedIndex,
        ) -> T {
            match result {
                Read::Ok(value) => value,
                Read::Missing => {
                    loaded.missing.push(name);
                    T::default()
                }
                Read::Corrupt(reason) => {
                    warn!(artifact = name, "Artifact is corrupt, treating as empty: {}", reason);
                    loaded.corrupt.push(name);
                    T::default()
                }
            }
        }

        let manifest = settle(read_json::<IndexManifest>(&self.paths.manifest), MANIFEST_FILE, &mut loaded);
        let chunks = settle(read_chunks(&self.paths.chunks), CHUNKS_FILE, &mut loaded);
        let bm25 = match read_json::<Bm25Snapshot>(&self.paths.bm25) {
            Read::Ok(snapshot) => Read::Ok(BM25Index::from_snapshot(snapshot)),
            Read::Missing => Read::Missing,
            Read::Corrupt(reason) => Read::Corrupt(reason),
        };
        let bm25 = settle(bm25, BM25_FILE, &mut loaded);
        let vectors = match read_json::<VectorSnapshot>(&self.paths.vectors) {
            Read::Ok(snapshot) => Read::Ok(VectorStore::from_snapshot(snapshot)),
            Read::Missing => Read::Missing,
            Read::Corrupt(reason) => Read::Corrupt(reason),
        };
        let vectors = settle(vectors, VECTOR_FILE, &mut loaded);

        loaded.artifacts = IndexArtifacts {
            manifest,
            chunks,
            bm25,
            vectors,
        };
        debug!(
            files = loaded.artifacts.manifest.len(),
            chunks = loaded.artifacts.chunks.len(),
            corrupt = loaded.corrupt.len(),
            "Loaded index artifacts from {:?}",
            self.paths.dir
        );
        loaded
    }

    /// Persist all four artifacts.
    pub fn save(&self, artifacts: &IndexArtifacts) -> Result<(), StorageError> {
        fs::create_dir_all(&self.paths.dir).map_err(|e| StorageError::io(&self.paths.dir, e))?;

        let mut chunk_lines = String::new();
        for chunk in artifacts.chunks.values() {
            let line = serde_json::to_string(chunk)
                .map_err(|source| StorageError::Serialize { name: CHUNKS_FILE, source })?;
            chunk_lines.push_str(&line);
            chunk_lines.push('\n');
        }

        let manifest = to_json(MANIFEST_FILE, &artifacts.manifest)?;
        let bm25 = to_json(BM25_FILE, &artifacts.bm25.to_snapshot())?;
        let vectors = to_json(VECTOR_FILE, &artifacts.vectors.to_snapshot())?;

        write_atomic(&self.paths.chunks, chunk_lines.as_bytes())?;
        write_atomic(&self.paths.bm25, bm25.as_bytes())?;
        write_atomic(&self.paths.vectors, vectors.as_bytes())?;
        // Manifest last: it is what the next run trusts.
        write_atomic(&self.paths.manifest, manifest.as_bytes())?;

        info!(
            files = artifacts.manifest.len(),
            chunks = artifacts.chunks.len(),
            "Saved index to {:?}",
            self.paths.dir
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkKind, FileMeta, LineChunker};
    use crate::manifest::FileState;
    use crate::repo_index::NoSymbolIndex;
    use crate::search::tokenize;
    use tempfile::TempDir;

    fn sample() -> IndexArtifacts {
        let meta = FileMeta {
            rel_path: "src/foo.py",
            kind: ChunkKind::Code,
            mtime: 1,
            size: 20,
        };
        let chunks = LineChunker::default().chunk_text("def foo():\n    return 1\n", &meta, &NoSymbolIndex);
        let mut artifacts = IndexArtifacts::default();
        for chunk in &chunks {
            artifacts.bm25.add_document(&chunk.chunk_id, &tokenize(&chunk.text));
            artifacts.vectors.add(&chunk.chunk_id, vec![1.0, 0.5]);
        }
        artifacts.manifest.record_indexed(FileState {
            path: "src/foo.py".to_string(),
            content_hash: "abc".to_string(),
            mtime: 1,
            size: 20,
            chunk_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
            last_indexed: String::new(),
        });
        artifacts.chunks = chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();
        artifacts
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("rag"));
        let artifacts = sample();
        assert!(artifacts.is_consistent());

        store.save(&artifacts).unwrap();
        let loaded = store.load();
        assert!(loaded.corrupt.is_empty());
        assert!(loaded.missing.is_empty());
        assert_eq!(loaded.artifacts, artifacts);
    }

    #[test]
    fn test_missing_directory_loads_fresh() {
        let dir = TempDir::new().unwrap();
        let loaded = ArtifactStore::new(dir.path().join("nothing")).load();
        assert!(loaded.is_fresh());
        assert!(loaded.artifacts.manifest.is_empty());
    }

    #[test]
    fn test_corrupt_artifact_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(&sample()).unwrap();
        fs::write(&store.paths().bm25, "{ truncated").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.corrupt, vec![BM25_FILE]);
        assert!(loaded.artifacts.bm25.is_empty());
        assert!(!loaded.artifacts.is_consistent());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_query_output_path() {
        let paths = IndexPaths::new("/tmp/rag");
        assert_eq!(
            paths.query_output("20240101_120000", "json"),
            PathBuf::from("/tmp/rag/rag_query_20240101_120000.json")
        );
    }
}
