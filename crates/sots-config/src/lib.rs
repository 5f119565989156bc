//! Layered configuration for the retrieval tooling.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file (`sots_rag.toml` in the working directory unless a
//! path is given) and `SOTS_RAG__<SECTION>__<KEY>` environment variables.
//! Command line flags are applied on top by the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "sots_rag.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SOTS_RAG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Defaults to the detected project root
    pub project_root: Option<String>,
    /// Defaults to `<project_root>/Reports/RAG`
    pub reports_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub include_code: bool,
    pub include_docs: bool,
    /// Comma separated plugin name globs
    pub plugin_filter: String,
    pub respect_gitignore: bool,
    pub code_chunk_lines: usize,
    pub config_chunk_lines: usize,
    pub doc_chunk_lines: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            include_code: true,
            include_docs: true,
            plugin_filter: String::new(),
            respect_gitignore: false,
            code_chunk_lines: 300,
            config_chunk_lines: 250,
            doc_chunk_lines: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hash` or `remote`
    pub backend: String,
    pub model: Option<String>,
    /// OpenAI-compatible embeddings endpoint
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "hash".to_string(),
            model: None,
            base_url: "https://api.openai.com/v1/embeddings".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl EmbeddingConfig {
    /// The API key, read from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k: usize,
    pub bm25_n: usize,
    pub vec_n: usize,
    pub rerank: bool,
    pub rerank_k: usize,
    /// Rerank bonus per symbol hit on a chunk
    pub symbol_bonus: f64,
    /// Rerank bonus per tag hit on a chunk
    pub tag_bonus: f64,
    /// Rerank bonus per query token found verbatim in a chunk
    pub token_bonus: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 12,
            bm25_n: 20,
            vec_n: 20,
            rerank: false,
            rerank_k: 30,
            symbol_bonus: 0.2,
            tag_bonus: 0.1,
            token_bonus: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub paths: PathsConfig,
    pub index: IndexConfig,
    pub bm25: Bm25Config,
    pub embedding: EmbeddingConfig,
    pub query: QueryConfig,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl RagConfig {
    /// Load from `path` (which must exist) or from `sots_rag.toml` in the
    /// working directory when present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`RagConfig::load`] with an explicit environment map, used
    /// instead of the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                builder = builder.add_source(
                    File::with_name(DEFAULT_CONFIG_FILE)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: RagConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.index.code_chunk_lines == 0
            || self.index.config_chunk_lines == 0
            || self.index.doc_chunk_lines == 0
        {
            return invalid("chunk line counts must be > 0");
        }
        if self.bm25.k1 < 0.0 {
            return invalid("bm25.k1 must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return invalid("bm25.b must be in [0.0, 1.0]");
        }
        if self.query.top_k == 0 {
            return invalid("query.top_k must be >= 1");
        }
        let bonuses = [self.query.symbol_bonus, self.query.tag_bonus, self.query.token_bonus];
        if bonuses.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return invalid("rerank bonuses must be finite and >= 0");
        }
        match self.embedding.backend.to_ascii_lowercase().as_str() {
            "hash" | "remote" | "openai" | "openrouter" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unknown embedding backend '{}', expected hash or remote",
                other
            ))),
        }
    }

    /// Configured project root with `~` expanded.
    pub fn project_root(&self) -> Option<PathBuf> {
        self.paths.project_root.as_deref().map(expand)
    }

    /// Configured reports directory, else `<root>/Reports/RAG`.
    pub fn reports_dir(&self, project_root: &Path) -> PathBuf {
        match self.paths.reports_dir.as_deref() {
            Some(dir) => expand(dir),
            None => project_root.join("Reports").join("RAG"),
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Nearest ancestor of `start` that looks like a project root: it holds a
/// `sots_rag.toml` or a `Plugins` directory. Falls back to `start`.
pub fn detect_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(DEFAULT_CONFIG_FILE).is_file() || dir.join("Plugins").is_dir())
        .unwrap_or(start)
        .to_path_buf()
}
