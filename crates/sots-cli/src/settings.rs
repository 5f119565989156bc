//! Resolution of configuration file, environment and flags into the
//! library's config types.

use std::path::PathBuf;

use anyhow::{Context, Result};
use sots_config::{detect_project_root, RagConfig};
use sots_rag::{
    BackendKind, ChunkSizes, EmbeddingProvider, HeuristicReranker, IndexerConfig, QueryConfig,
    RemoteSettings, ScanOptions,
};
use tracing::debug;

use crate::{CommonArgs, IndexArgs, QueryArgs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    pub reports_dir: PathBuf,
    pub config: RagConfig,
}

impl Settings {
    /// Load the layered config and apply the common flags on top.
    pub fn resolve(args: &CommonArgs) -> Result<Self> {
        let mut config =
            RagConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
        if let Some(backend) = &args.embedding_backend {
            config.embedding.backend = backend.clone();
        }
        if let Some(model) = &args.embedding_model {
            config.embedding.model = Some(model.clone());
        }
        config.validate().context("Invalid command line options")?;

        let project_root = match args.project_root.clone().or_else(|| config.project_root()) {
            Some(root) => root,
            None => {
                let cwd = std::env::current_dir().context("Failed to read working directory")?;
                detect_project_root(&cwd)
            }
        };
        let reports_dir = args
            .reports_dir
            .clone()
            .unwrap_or_else(|| config.reports_dir(&project_root));
        debug!(
            project_root = %project_root.display(),
            reports_dir = %reports_dir.display(),
            "Resolved settings"
        );

        Ok(Self {
            project_root,
            reports_dir,
            config,
        })
    }

    /// Provider for the configured backend, falling back to hash embeddings.
    pub fn embedding_provider(&self) -> Result<EmbeddingProvider> {
        let embedding = &self.config.embedding;
        let kind: BackendKind = embedding.backend.parse()?;
        let remote = RemoteSettings {
            base_url: embedding.base_url.clone(),
            model: embedding.model.clone(),
            api_key: embedding.api_key(),
        };
        Ok(EmbeddingProvider::new(kind, &remote))
    }

    pub fn indexer_config(&self, args: &IndexArgs) -> IndexerConfig {
        let index = &self.config.index;
        IndexerConfig {
            project_root: self.project_root.clone(),
            reports_dir: self.reports_dir.clone(),
            full: args.full,
            scan: ScanOptions {
                include_code: args.include_code.unwrap_or(index.include_code),
                include_docs: args.include_docs.unwrap_or(index.include_docs),
                plugin_filter: args
                    .plugin_filter
                    .clone()
                    .unwrap_or_else(|| index.plugin_filter.clone()),
                respect_gitignore: index.respect_gitignore,
                reports_dir: None,
            },
            chunk_sizes: ChunkSizes {
                code: index.code_chunk_lines,
                config: index.config_chunk_lines,
                doc: index.doc_chunk_lines,
            },
            bm25_k1: self.config.bm25.k1,
            bm25_b: self.config.bm25.b,
        }
    }

    pub fn query_config(&self, args: &QueryArgs) -> QueryConfig {
        let query = &self.config.query;
        QueryConfig {
            top_k: args.top_k.unwrap_or(query.top_k),
            bm25_n: args.bm25_n.unwrap_or(query.bm25_n),
            vec_n: args.vec_n.unwrap_or(query.vec_n),
            rerank: args.rerank || query.rerank,
            rerank_k: args.rerank_k.unwrap_or(query.rerank_k),
            ..QueryConfig::default()
        }
    }

    /// Reranker with the configured bonuses.
    pub fn reranker(&self) -> HeuristicReranker {
        let query = &self.config.query;
        HeuristicReranker {
            symbol_bonus: query.symbol_bonus,
            tag_bonus: query.tag_bonus,
            token_bonus: query.token_bonus,
        }
    }
}
