//! Main indexer orchestrator.
//!
//! [`RagIndexer`] walks the project, compares every file's content hash
//! with the manifest and rebuilds only what changed: old chunks of a
//! changed or deleted file are retracted from the chunk map, BM25 index and
//! vector store before the new chunks go in. Artifacts are persisted once,
//! after the whole tree has been processed.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::chunker::{sha256_hex, Chunk, ChunkSizes, FileMeta, LineChunker};
use crate::embeddings::EmbeddingProvider;
use crate::manifest::{FileState, IndexManifest};
use crate::repo_index::{RepoIndexBridge, SymbolIndex};
use crate::report::{render_index_report, RunLog};
use crate::scanner::{collect_files, ScanOptions, ScannedFile};
use crate::search::bm25::{DEFAULT_B, DEFAULT_K1};
use crate::search::{tokenize, BM25Index, VectorStore};
use crate::storage::{write_atomic, ArtifactStore, IndexArtifacts, IndexPaths};

/// Configuration for the indexer.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub project_root: PathBuf,
    /// Where artifacts and reports are written
    pub reports_dir: PathBuf,
    /// Discard existing artifacts and reindex everything
    pub full: bool,
    pub scan: ScanOptions,
    pub chunk_sizes: ChunkSizes,
    pub bm25_k1: f64,
    pub bm25_b: f64,
}

impl IndexerConfig {
    /// Defaults for `project_root`, with artifacts under `Reports/RAG`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            reports_dir: project_root.join(crate::DEFAULT_REPORTS_SUBDIR),
            project_root,
            full: false,
            scan: ScanOptions::default(),
            chunk_sizes: ChunkSizes::default(),
            bm25_k1: DEFAULT_K1,
            bm25_b: DEFAULT_B,
        }
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            reports_dir: Some(self.reports_dir.clone()),
            ..self.scan.clone()
        }
    }
}

/// Stages of an index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Scanning,
    Diffing,
    Rebuilding,
    Persisting,
    Done,
}

impl fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scanning => "scanning",
            Self::Diffing => "diffing",
            Self::Rebuilding => "rebuilding",
            Self::Persisting => "persisting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Statistics about an indexing operation.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub files_scanned: usize,
    /// Files (re)chunked this run, including added ones
    pub files_changed: usize,
    pub files_added: usize,
    pub files_deleted: usize,
    /// Files that could not be read or embedded
    pub files_skipped: usize,
    pub chunks_total: usize,
    pub chunks_added: usize,
    pub embeddings_computed: usize,
    pub repo_index_loaded: bool,
    pub full_rebuild: bool,
    /// Why a full rebuild happened
    pub rebuild_reason: Option<String>,
    pub embedding_model: String,
    /// Why the requested embedding backend was replaced
    pub embedding_fallback: Option<String>,
    pub elapsed: Duration,
}

impl IndexStats {
    pub fn has_changes(&self) -> bool {
        self.files_changed > 0 || self.files_deleted > 0
    }
}

/// A file whose content hash differs from the manifest.
#[derive(Debug)]
struct PendingFile {
    file: ScannedFile,
    is_new: bool,
    bytes: Vec<u8>,
    content_hash: String,
}

/// A file read, chunked and embedded, ready to be swapped in.
struct PreparedFile {
    state: FileState,
    chunks: Vec<(Chunk, Vec<f32>)>,
}

fn file_stat(path: &Path) -> std::io::Result<(i64, u64)> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((mtime, metadata.len()))
}

/// Main indexer that orchestrates incremental indexing.
pub struct RagIndexer {
    config: IndexerConfig,
    chunker: LineChunker,
    embeddings: EmbeddingProvider,
    symbols: Box<dyn SymbolIndex>,
    store: ArtifactStore,
    phase: IndexPhase,
}

impl RagIndexer {
    /// Create an indexer, loading the symbol index from the project root.
    pub fn new(config: IndexerConfig, embeddings: EmbeddingProvider) -> Self {
        let symbols = Box::new(RepoIndexBridge::load(&config.project_root));
        Self::with_symbol_index(config, embeddings, symbols)
    }

    pub fn with_symbol_index(
        config: IndexerConfig,
        embeddings: EmbeddingProvider,
        symbols: Box<dyn SymbolIndex>,
    ) -> Self {
        Self {
            chunker: LineChunker::new(config.chunk_sizes),
            store: ArtifactStore::new(&config.reports_dir),
            config,
            embeddings,
            symbols,
            phase: IndexPhase::Scanning,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn paths(&self) -> &IndexPaths {
        self.store.paths()
    }

    pub fn phase(&self) -> IndexPhase {
        self.phase
    }

    fn enter(&mut self, phase: IndexPhase) {
        debug!(from = %self.phase, to = %phase, "Index phase");
        self.phase = phase;
    }

    /// Decide whether existing artifacts can be updated in place.
    fn rebuild_reason(&self, artifacts: &IndexArtifacts, corrupt: &[&str]) -> Option<String> {
        if self.config.full {
            return Some("requested".to_string());
        }
        if !corrupt.is_empty() {
            return Some(format!("corrupt artifacts: {}", corrupt.join(", ")));
        }
        if !artifacts.is_consistent() {
            return Some("artifacts inconsistent with manifest".to_string());
        }
        let vectors = &artifacts.vectors;
        let identity = self.embeddings.identity();
        if !vectors.is_empty() {
            if vectors.get_dim() != identity.dimension {
                return Some(format!(
                    "vector dimension changed ({} -> {})",
                    vectors.get_dim(),
                    identity.dimension
                ));
            }
            if vectors.model() != identity.model {
                return Some(format!(
                    "embedding model changed ({} -> {})",
                    vectors.model(),
                    identity.model
                ));
            }
        }
        None
    }

    fn fresh_artifacts(&self) -> IndexArtifacts {
        IndexArtifacts {
            manifest: IndexManifest::new(),
            chunks: Default::default(),
            bm25: BM25Index::with_params(self.config.bm25_k1, self.config.bm25_b),
            vectors: VectorStore::for_model(self.embeddings.get_model_name()),
        }
    }

    /// Chunk and embed the bytes read while diffing, without touching the
    /// index.
    fn prepare(&self, file: &ScannedFile, bytes: &[u8], content_hash: String) -> Result<PreparedFile> {
        let (mtime, size) = file_stat(&file.abs_path)
            .with_context(|| format!("Failed to stat {}", file.rel_path))?;
        let text = String::from_utf8_lossy(bytes);

        let meta = FileMeta {
            rel_path: &file.rel_path,
            kind: file.kind,
            mtime,
            size,
        };
        let mut chunks = Vec::new();
        for chunk in self.chunker.chunk_text(&text, &meta, self.symbols.as_ref()) {
            let vector = self
                .embeddings
                .embed(&chunk.text)
                .with_context(|| format!("Failed to embed {}", chunk.location()))?;
            chunks.push((chunk, vector));
        }

        Ok(PreparedFile {
            state: FileState {
                path: file.rel_path.clone(),
                content_hash,
                mtime,
                size,
                chunk_ids: chunks.iter().map(|(c, _)| c.chunk_id.clone()).collect(),
                last_indexed: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            chunks,
        })
    }

    /// Run one indexing pass and persist the result.
    pub fn run(&mut self) -> Result<IndexStats> {
        let start = Instant::now();
        let mut log = RunLog::new("rag_index");
        let mut stats = IndexStats {
            repo_index_loaded: self.symbols.is_available(),
            embedding_model: self.embeddings.get_model_name().to_string(),
            embedding_fallback: self.embeddings.fallback_reason().map(str::to_string),
            ..IndexStats::default()
        };

        log.log(format!("Project root: {}", self.config.project_root.display()));
        log.log(format!("Embedding backend: {}", self.embeddings.identity()));
        if let Some(reason) = &stats.embedding_fallback {
            log.log(format!(
                "Requested embedding backend unavailable ({}); using hash embeddings",
                reason
            ));
        }
        if !stats.repo_index_loaded {
            log.log("RepoIndex data not available; skipping symbol/tag enrichment.");
        }

        self.enter(IndexPhase::Scanning);
        let files = collect_files(&self.config.project_root, &self.config.scan_options())
            .context("Failed to scan project")?;
        stats.files_scanned = files.len();
        log.log(format!("Files scanned: {}", files.len()));

        let loaded = self.store.load();
        if loaded.is_fresh() {
            log.log(format!("No index at {}; building from scratch", self.store.paths().dir.display()));
        }
        let previous = loaded.artifacts.manifest.clone();
        stats.rebuild_reason = self.rebuild_reason(&loaded.artifacts, &loaded.corrupt);
        stats.full_rebuild = stats.rebuild_reason.is_some();
        let mut artifacts = match &stats.rebuild_reason {
            Some(reason) => {
                log.log(format!("Full rebuild: {}", reason));
                self.fresh_artifacts()
            }
            None => {
                let mut artifacts = loaded.artifacts;
                artifacts.bm25.set_params(self.config.bm25_k1, self.config.bm25_b);
                if artifacts.vectors.is_empty() {
                    artifacts.vectors = VectorStore::for_model(self.embeddings.get_model_name());
                }
                artifacts
            }
        };

        self.enter(IndexPhase::Diffing);
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<PendingFile> = Vec::new();
        for file in files {
            seen.insert(file.rel_path.clone());
            let bytes = match std::fs::read(&file.abs_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %file.rel_path, "Skipping unreadable file: {}", e);
                    log.log(format!("Skipped {}: {}", file.rel_path, e));
                    stats.files_skipped += 1;
                    continue;
                }
            };
            let content_hash = sha256_hex(&bytes);
            if artifacts.manifest.needs_update(&file.rel_path, &content_hash) {
                pending.push(PendingFile {
                    is_new: previous.get(&file.rel_path).is_none(),
                    file,
                    bytes,
                    content_hash,
                });
            } else if let Ok((mtime, size)) = file_stat(&file.abs_path) {
                artifacts.manifest.touch(&file.rel_path, mtime, size);
            }
        }
        let deleted = previous.find_deleted_files(&seen);
        debug!(pending = pending.len(), deleted = deleted.len(), "Diff complete");

        self.enter(IndexPhase::Rebuilding);
        for path in &deleted {
            if let Some(state) = artifacts.manifest.remove_file(path) {
                retract(&mut artifacts, &state.chunk_ids);
            }
            log.log(format!("Deleted: {}", path));
        }
        stats.files_deleted = deleted.len();

        for PendingFile {
            file,
            is_new,
            bytes,
            content_hash,
        } in pending
        {
            let prepared = match self.prepare(&file, &bytes, content_hash) {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(path = %file.rel_path, "Skipping file: {:#}", e);
                    log.log(format!("Skipped {}: {:#}", file.rel_path, e));
                    stats.files_skipped += 1;
                    continue;
                }
            };

            if let Some(old) = artifacts.manifest.remove_file(&file.rel_path) {
                retract(&mut artifacts, &old.chunk_ids);
            }
            for (chunk, vector) in prepared.chunks {
                artifacts.bm25.add_document(&chunk.chunk_id, &tokenize(&chunk.text));
                if artifacts.vectors.add(&chunk.chunk_id, vector) {
                    stats.embeddings_computed += 1;
                }
                artifacts.chunks.insert(chunk.chunk_id.clone(), chunk);
                stats.chunks_added += 1;
            }
            artifacts.manifest.record_indexed(prepared.state);

            stats.files_changed += 1;
            if is_new {
                stats.files_added += 1;
            }
            debug!(path = %file.rel_path, new = is_new, "Indexed file");
        }
        stats.chunks_total = artifacts.chunks.len();

        self.enter(IndexPhase::Persisting);
        self.store
            .save(&artifacts)
            .context("Failed to persist index artifacts")?;

        stats.elapsed = start.elapsed();
        if !stats.has_changes() {
            log.log("No changes detected.");
        }
        log.log(format!(
            "Files added={} changed={} deleted={} skipped={}; chunks total={} new={}",
            stats.files_added,
            stats.files_changed,
            stats.files_deleted,
            stats.files_skipped,
            stats.chunks_total,
            stats.chunks_added
        ));

        let paths = self.store.paths();
        write_atomic(&paths.report, render_index_report(&self.config, &stats).as_bytes())
            .context("Failed to write index report")?;
        log.flush_to(&paths.run_log)
            .context("Failed to append run log")?;

        self.enter(IndexPhase::Done);
        info!(
            files = stats.files_scanned,
            changed = stats.files_changed,
            deleted = stats.files_deleted,
            chunks = stats.chunks_total,
            full = stats.full_rebuild,
            "Indexing complete in {:.2}s",
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }
}

/// Remove chunk ids from every structure that holds them.
fn retract(artifacts: &mut IndexArtifacts, chunk_ids: &[String]) {
    for id in chunk_ids {
        artifacts.chunks.remove(id);
        artifacts.bm25.remove_document(id);
        artifacts.vectors.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use crate::repo_index::NoSymbolIndex;
    use std::fs;
    use tempfile::TempDir;

    fn indexer(root: &Path) -> RagIndexer {
        RagIndexer::with_symbol_index(
            IndexerConfig::new(root),
            EmbeddingProvider::hash(),
            Box::new(NoSymbolIndex),
        )
    }

    #[test]
    fn test_indexer_config_default() {
        let config = IndexerConfig::new("/project");
        assert_eq!(config.reports_dir, PathBuf::from("/project/Reports/RAG"));
        assert!(!config.full);
        assert!(config.scan.include_code);
        assert!(config.scan.include_docs);
        assert_eq!(config.bm25_k1, 1.5);
        assert_eq!(config.bm25_b, 0.75);
    }

    #[test]
    fn test_index_stats_default() {
        let stats = IndexStats::default();
        assert_eq!(stats.files_scanned, 0);
        assert_eq!(stats.chunks_added, 0);
        assert!(!stats.full_rebuild);
        assert!(!stats.has_changes());
    }

    #[test]
    fn test_first_run_indexes_everything() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.py"), "def alpha():\n    pass\n").unwrap();
        fs::write(dir.path().join("notes.md"), "# Notes\n").unwrap();

        let mut indexer = indexer(dir.path());
        let stats = indexer.run().unwrap();

        assert_eq!(indexer.phase(), IndexPhase::Done);
        assert_eq!(stats.files_scanned, 2);
        assert_eq!(stats.files_added, 2);
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.chunks_total, 2);
        assert_eq!(stats.embeddings_computed, 2);
        assert!(!stats.full_rebuild);
        assert!(indexer.paths().report.exists());
        assert!(indexer.paths().run_log.exists());
    }

    #[test]
    fn test_second_run_is_noop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.h"), "struct A {};\n").unwrap();

        let mut indexer = indexer(dir.path());
        indexer.run().unwrap();
        let stats = indexer.run().unwrap();

        assert_eq!(stats.files_changed, 0);
        assert_eq!(stats.embeddings_computed, 0);
        assert_eq!(stats.chunks_total, 1);
        assert!(!stats.has_changes());
        let report = fs::read_to_string(&indexer.paths().report).unwrap();
        assert!(report.contains("No changes detected"));
    }

    #[test]
    fn test_changed_file_replaces_chunks() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int old_value = 1;\n").unwrap();

        let mut indexer = indexer(dir.path());
        indexer.run().unwrap();
        fs::write(&file, "int new_value = 2;\n").unwrap();
        let stats = indexer.run().unwrap();

        assert_eq!(stats.files_changed, 1);
        assert_eq!(stats.files_added, 0);
        let loaded = ArtifactStore::new(&indexer.config().reports_dir).load();
        let chunk = loaded.artifacts.chunks.values().next().unwrap();
        assert!(chunk.text.contains("new_value"));
        assert_eq!(loaded.artifacts.bm25.doc_freq("old_value"), 0);
        assert_eq!(loaded.artifacts.bm25.doc_freq("new_value"), 1);
    }

    #[test]
    fn test_prepare_uses_bytes_read_while_diffing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "def on_disk():\n    pass\n").unwrap();

        let indexer = indexer(dir.path());
        let file = ScannedFile {
            abs_path: path,
            rel_path: "a.py".to_string(),
            kind: ChunkKind::Code,
        };
        let bytes = b"def diffed():\n    pass\n";
        let prepared = indexer.prepare(&file, bytes, sha256_hex(bytes)).unwrap();

        assert_eq!(prepared.state.content_hash, sha256_hex(bytes));
        assert_eq!(prepared.chunks.len(), 1);
        assert!(prepared.chunks[0].0.text.contains("diffed"));
        assert!(!prepared.chunks[0].0.text.contains("on_disk"));
    }

    #[test]
    fn test_run_log_records_identity_and_fresh_start() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.h"), "struct A {};\n").unwrap();

        let mut indexer = indexer(dir.path());
        indexer.run().unwrap();
        let first = fs::read_to_string(&indexer.paths().run_log).unwrap();
        assert!(first.contains("Embedding backend: hash (hash, dim 64)"));
        assert!(first.contains("building from scratch"));

        indexer.run().unwrap();
        let both = fs::read_to_string(&indexer.paths().run_log).unwrap();
        assert_eq!(both.matches("building from scratch").count(), 1);
    }
}
