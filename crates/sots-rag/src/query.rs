//! Hybrid query over a persisted index.
//!
//! A query combines exact symbol/tag hits from the external index, BM25
//! candidates and vector candidates, merges them into one ranking and
//! optionally reranks the head of the list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, ChunkKind};
use crate::embeddings::EmbeddingProvider;
use crate::repo_index::{RepoIndexBridge, SymbolIndex};
use crate::report::RunLog;
use crate::reranker::{HeuristicReranker, Reranker, RerankerDoc};
use crate::search::{
    merge_candidates, sort_hits, tokenize, BM25Index, MergeWeights, MergedHit, ScoreBreakdown,
    VectorStore,
};
use crate::storage::{ArtifactStore, IndexPaths};

const SNIPPET_MAX_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error(
        "index vectors have dimension {index_dim} but the embedding provider ({model}) produces {provider_dim}; \
         reindex or select the matching embedding backend"
    )]
    DimensionMismatch {
        index_dim: usize,
        provider_dim: usize,
        model: String,
    },

    #[error("index at {dir} is unreadable ({reason}); rerun the indexer")]
    InconsistentIndex { dir: PathBuf, reason: String },
}

/// Tunables for a single query.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub top_k: usize,
    pub bm25_n: usize,
    pub vec_n: usize,
    pub rerank: bool,
    pub rerank_k: usize,
    pub weights: MergeWeights,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 12,
            bm25_n: 20,
            vec_n: 20,
            rerank: false,
            rerank_k: 30,
            weights: MergeWeights::default(),
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub rank: usize,
    pub chunk_id: String,
    pub path: String,
    pub plugin: String,
    pub module: String,
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub snippet: String,
    pub how_to_open: String,
    pub symbol_hits: Vec<String>,
    pub tag_hits: Vec<String>,
}

/// Candidate counts per retrieval method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub exact_hits: usize,
    pub bm25_candidates: usize,
    pub vector_candidates: usize,
}

/// Everything a query produced. The JSON, text and log outputs are all
/// rendered from this value.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: String,
    /// `%Y%m%d_%H%M%S_%3f`
    pub timestamp: String,
    pub repo_index_available: bool,
    pub stats: QueryStats,
    pub top_hits: Vec<QueryHit>,
    #[serde(skip)]
    pub log_lines: Vec<String>,
}

/// First non-blank line mentioning a query token, else the first non-blank
/// line, trimmed and capped at 200 characters.
pub fn format_snippet(text: &str, query_tokens: &[String]) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let tokens: Vec<String> = query_tokens.iter().map(|t| t.to_lowercase()).collect();
    let chosen = lines
        .iter()
        .find(|line| {
            let lower = line.to_lowercase();
            tokens.iter().any(|t| !t.is_empty() && lower.contains(t.as_str()))
        })
        .or(lines.first());
    chosen
        .map(|line| line.chars().take(SNIPPET_MAX_CHARS).collect())
        .unwrap_or_default()
}

/// Read-only view of a persisted index for answering queries.
pub struct RagQuery {
    paths: IndexPaths,
    chunks: BTreeMap<String, Chunk>,
    /// Chunk ids per path, in line order
    chunks_by_path: BTreeMap<String, Vec<String>>,
    bm25: BM25Index,
    vectors: VectorStore,
    embeddings: EmbeddingProvider,
    symbols: Box<dyn SymbolIndex>,
    reranker: Box<dyn Reranker>,
}

impl RagQuery {
    /// Open the index in `reports_dir`, loading the symbol index from the
    /// project root.
    pub fn open(
        project_root: &Path,
        reports_dir: &Path,
        embeddings: EmbeddingProvider,
    ) -> Result<Self, QueryError> {
        let symbols = Box::new(RepoIndexBridge::load(project_root));
        Self::with_symbol_index(reports_dir, embeddings, symbols)
    }

    /// Open with an explicit symbol index.
    ///
    /// A missing or empty index is not an error: queries simply return no
    /// hits. Vectors built with a different dimension are, and so is a set
    /// of artifacts that is corrupt or disagrees with its manifest.
    pub fn with_symbol_index(
        reports_dir: &Path,
        embeddings: EmbeddingProvider,
        symbols: Box<dyn SymbolIndex>,
    ) -> Result<Self, QueryError> {
        let store = ArtifactStore::new(reports_dir);
        let loaded = store.load();
        if loaded.is_fresh() {
            warn!("No index at {}; queries will return no hits", reports_dir.display());
        }
        // A save in progress or a damaged file leaves a mixed set behind.
        let reason = if !loaded.corrupt.is_empty() {
            Some(format!("corrupt artifacts: {}", loaded.corrupt.join(", ")))
        } else if !loaded.artifacts.is_consistent() {
            Some("artifacts disagree with the manifest".to_string())
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(QueryError::InconsistentIndex {
                dir: reports_dir.to_path_buf(),
                reason,
            });
        }
        let artifacts = loaded.artifacts;

        let identity = embeddings.identity();
        let index_dim = artifacts.vectors.get_dim();
        if index_dim != 0 && index_dim != identity.dimension {
            return Err(QueryError::DimensionMismatch {
                index_dim,
                provider_dim: identity.dimension,
                model: identity.model,
            });
        }

        let mut chunks_by_path: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut ordered: Vec<&Chunk> = artifacts.chunks.values().collect();
        ordered.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_line.cmp(&b.start_line)));
        for chunk in ordered {
            chunks_by_path
                .entry(chunk.path.clone())
                .or_default()
                .push(chunk.chunk_id.clone());
        }

        debug!(chunks = artifacts.chunks.len(), "Opened index at {:?}", reports_dir);
        Ok(Self {
            paths: store.paths().clone(),
            chunks: artifacts.chunks,
            chunks_by_path,
            bm25: artifacts.bm25,
            vectors: artifacts.vectors,
            embeddings,
            symbols,
            reranker: Box::new(HeuristicReranker::default()),
        })
    }

    /// Replace the reranker used when `QueryConfig::rerank` is set.
    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn chunk_at(&self, rel_path: &str, line: usize) -> Option<&Chunk> {
        self.chunks_by_path
            .get(rel_path)?
            .iter()
            .filter_map(|id| self.chunks.get(id))
            .find(|c| c.contains_line(line))
    }

    fn exact_candidates(&self, query: &str) -> Vec<String> {
        self.symbols
            .exact_matches(query)
            .into_iter()
            .filter(|m| !m.path.is_empty())
            .filter_map(|m| {
                let line = m.line?;
                self.chunk_at(&m.path, line).map(|c| c.chunk_id.clone())
            })
            .collect()
    }

    fn vector_candidates(&self, query: &str, limit: usize, log: &mut RunLog) -> Vec<(String, f32)> {
        if self.vectors.is_empty() || limit == 0 {
            return Vec::new();
        }
        match self.embeddings.embed(query) {
            Ok(vector) => self.vectors.search(&vector, limit),
            Err(e) => {
                warn!("Embedding query failed: {:#}", e);
                log.log(format!("Embedding query failed: {:#}", e));
                Vec::new()
            }
        }
    }

    fn rerank(&self, hits: &mut [MergedHit], tokens: &[String], rerank_k: usize) {
        let head = rerank_k.min(hits.len());
        if head == 0 {
            return;
        }
        let docs: Vec<RerankerDoc<'_>> = hits[..head]
            .iter()
            .filter_map(|hit| {
                let chunk = self.chunks.get(&hit.chunk_id)?;
                Some(RerankerDoc {
                    id: &hit.chunk_id,
                    text: &chunk.text,
                    score: hit.score,
                    symbol_hits: chunk.symbol_hits.len(),
                    tag_hits: chunk.tag_hits.len(),
                })
            })
            .collect();
        let results: BTreeMap<String, (f64, f64)> = self
            .reranker
            .rerank(tokens, &docs)
            .into_iter()
            .map(|r| (r.id, (r.score, r.bonus)))
            .collect();

        for hit in hits[..head].iter_mut() {
            if let Some((score, bonus)) = results.get(&hit.chunk_id) {
                hit.score = *score;
                hit.breakdown.rerank = Some(*bonus);
            }
        }
        sort_hits(&mut hits[..head]);
    }

    fn to_hit(&self, rank: usize, merged: MergedHit, tokens: &[String]) -> Option<QueryHit> {
        let chunk = self.chunks.get(&merged.chunk_id)?;
        Some(QueryHit {
            rank,
            chunk_id: merged.chunk_id,
            path: chunk.path.clone(),
            plugin: chunk.plugin.clone(),
            module: chunk.module.clone(),
            kind: chunk.kind,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            score: merged.score,
            score_breakdown: merged.breakdown,
            snippet: format_snippet(&chunk.text, tokens),
            how_to_open: chunk.location(),
            symbol_hits: chunk.symbol_hits.clone(),
            tag_hits: chunk.tag_hits.clone(),
        })
    }

    /// Answer one query.
    ///
    /// BM25 candidates are limited to chunks with a positive score; chunks
    /// sharing no term with the query are only reachable through vectors.
    pub fn run(&self, query: &str, config: &QueryConfig) -> Result<QueryReport, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let mut log = RunLog::new("rag_query");
        log.log(format!("Embedding backend: {}", self.embeddings.get_model_name()));
        if let Some(reason) = self.embeddings.fallback_reason() {
            log.log(format!("Embedding fallback: {}", reason));
        }
        if self.is_empty() {
            log.log("Index is empty; run the indexer first.");
        }

        let tokens = tokenize(query);
        let exact = self.exact_candidates(query);
        let lexical: Vec<(String, f64)> = self
            .bm25
            .search(&tokens, config.bm25_n)
            .into_iter()
            .filter(|(id, _)| self.chunks.contains_key(id))
            .collect();
        let semantic: Vec<(String, f32)> = self
            .vector_candidates(query, config.vec_n, &mut log)
            .into_iter()
            .filter(|(id, _)| self.chunks.contains_key(id))
            .collect();

        let stats = QueryStats {
            exact_hits: exact.len(),
            bm25_candidates: lexical.len(),
            vector_candidates: semantic.len(),
        };
        let mut merged = merge_candidates(&exact, &lexical, &semantic, config.weights);
        if config.rerank {
            self.rerank(&mut merged, &tokens, config.rerank_k);
        }

        let top_hits: Vec<QueryHit> = merged
            .into_iter()
            .take(config.top_k)
            .enumerate()
            .filter_map(|(i, hit)| self.to_hit(i + 1, hit, &tokens))
            .collect();

        info!(
            exact = stats.exact_hits,
            bm25 = stats.bm25_candidates,
            vector = stats.vector_candidates,
            hits = top_hits.len(),
            "Query complete"
        );

        Ok(QueryReport {
            query: query.to_string(),
            timestamp: Local::now().format("%Y%m%d_%H%M%S_%3f").to_string(),
            repo_index_available: self.symbols.is_available(),
            stats,
            top_hits,
            log_lines: log.lines().to_vec(),
        })
    }
}
