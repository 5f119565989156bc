//! Embedding provider and backends.
//!
//! [`EmbeddingProvider`] wraps one [`EmbeddingBackend`]. Construction tries
//! the requested backend and falls back to [`HashEmbedding`] when it cannot
//! be loaded, recording why so reports can say similarity quality is
//! reduced.

mod hash;
mod remote;

pub use hash::HashEmbedding;
pub use remote::RemoteEmbeddings;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown embedding backend: {0}")]
    UnknownBackend(String),
}

/// A source of fixed-size text embeddings.
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the number of dimensions
    fn dimensions(&self) -> usize;

    /// Identifier of backend and model, used for index compatibility checks
    fn model_name(&self) -> &str;
}

/// Which backend to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Hash,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "openai" | "openrouter" => Ok(Self::Remote),
            "hash" => Ok(Self::Hash),
            other => Err(EmbeddingError::UnknownBackend(other.to_string())),
        }
    }
}

/// Settings for the remote backend.
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub model: Option<String>,
    /// Resolved API key, if any
    pub api_key: Option<String>,
}

/// Identity of the provider that built (or queries) an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub backend: String,
    pub model: String,
    pub dimension: usize,
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, dim {})", self.backend, self.model, self.dimension)
    }
}

/// Uniform `embed(text) -> vector` front for whichever backend loaded.
pub struct EmbeddingProvider {
    backend: Box<dyn EmbeddingBackend>,
    kind: BackendKind,
    fallback_reason: Option<String>,
}

impl EmbeddingProvider {
    /// Load the requested backend, falling back to hash embeddings.
    pub fn new(kind: BackendKind, settings: &RemoteSettings) -> Self {
        match kind {
            BackendKind::Hash => {
                info!("Using deterministic hash embeddings");
                Self::hash()
            }
            BackendKind::Remote => match Self::load_remote(settings) {
                Ok(backend) => {
                    info!(
                        model = backend.model_name(),
                        dim = backend.dimensions(),
                        "Loaded remote embedding backend"
                    );
                    Self {
                        backend: Box::new(backend),
                        kind: BackendKind::Remote,
                        fallback_reason: None,
                    }
                }
                Err(e) => {
                    warn!("Remote embeddings unavailable ({}); falling back to hash embeddings", e);
                    let mut provider = Self::hash();
                    provider.fallback_reason = Some(e.to_string());
                    provider
                }
            },
        }
    }

    fn load_remote(settings: &RemoteSettings) -> Result<RemoteEmbeddings, EmbeddingError> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EmbeddingError::Unavailable("no API key configured".to_string()))?;
        let model = settings
            .model
            .as_deref()
            .ok_or_else(|| EmbeddingError::Unavailable("no model configured".to_string()))?;
        RemoteEmbeddings::connect(&settings.base_url, model, api_key)
    }

    /// Provider backed by [`HashEmbedding`].
    pub fn hash() -> Self {
        Self::from_backend(Box::new(HashEmbedding::new()), BackendKind::Hash)
    }

    /// Wrap an already constructed backend.
    pub fn from_backend(backend: Box<dyn EmbeddingBackend>, kind: BackendKind) -> Self {
        Self {
            backend,
            kind,
            fallback_reason: None,
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.backend.embed(text)
    }

    pub fn get_dim(&self) -> usize {
        self.backend.dimensions()
    }

    pub fn get_model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Why the requested backend was replaced by hash embeddings.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            backend: self.kind.to_string(),
            model: self.get_model_name().to_string(),
            dimension: self.get_dim(),
        }
    }
}
