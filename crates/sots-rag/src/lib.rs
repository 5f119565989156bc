//! Incremental retrieval index over a project's source, config and docs.
//!
//! This crate provides:
//! - Line-window chunking with stable, content-independent chunk ids
//! - Content-hash manifest for incremental re-indexing
//! - BM25 lexical scoring with add/remove semantics
//! - Cosine-similarity vector store over pluggable embeddings
//! - Hybrid query merging exact symbol hits, BM25 and vector candidates
//! - Text, JSON and log reports for every run

pub mod chunker;
pub mod embeddings;
pub mod indexer;
pub mod manifest;
pub mod query;
pub mod repo_index;
pub mod report;
pub mod reranker;
pub mod scanner;
pub mod search;
pub mod storage;

// Re-exports
pub use chunker::{Chunk, ChunkKind, ChunkSizes, LineChunker};
pub use embeddings::{
    BackendKind, EmbeddingBackend, EmbeddingError, EmbeddingProvider, ProviderIdentity, RemoteSettings,
};
pub use indexer::{IndexPhase, IndexStats, IndexerConfig, RagIndexer};
pub use manifest::{FileState, IndexManifest, ManifestDiff, ManifestError};
pub use query::{QueryConfig, QueryError, QueryHit, QueryReport, QueryStats, RagQuery};
pub use repo_index::{ExactMatch, NoSymbolIndex, RepoIndexBridge, SymbolIndex};
pub use reranker::{HeuristicReranker, Reranker};
pub use scanner::ScanOptions;
pub use search::{merge_candidates, tokenize, BM25Index, MergeWeights, ScoreBreakdown, VectorStore};
pub use storage::{ArtifactStore, IndexArtifacts, IndexPaths, StorageError};

/// Version written into every persisted artifact
pub const SCHEMA_VERSION: u32 = 1;

/// Default artifact directory, relative to the project root
pub const DEFAULT_REPORTS_SUBDIR: &str = "Reports/RAG";

pub const MANIFEST_FILE: &str = "rag_manifest.json";
pub const CHUNKS_FILE: &str = "rag_chunks.jsonl";
pub const BM25_FILE: &str = "rag_bm25_index.json";
pub const VECTOR_FILE: &str = "rag_vector_index.json";
pub const REPORT_FILE: &str = "rag_index_report.txt";
pub const RUN_LOG_FILE: &str = "rag_index_run.log";
