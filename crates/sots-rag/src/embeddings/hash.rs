//! Deterministic hash-based pseudo-embeddings.
//!
//! Used whenever a real embedding backend is unavailable so the pipeline
//! stays testable without model weights or network access.

use anyhow::Result;
use sha2::{Digest, Sha512};

use super::EmbeddingBackend;

/// SHA-512 derived 64-dimensional embedding.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedding;

impl HashEmbedding {
    pub const DIM: usize = 64;
    pub const MODEL_NAME: &'static str = "hash";

    pub fn new() -> Self {
        Self
    }

    /// Each digest byte maps linearly onto `[-1.0, 1.0]`.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let digest = Sha512::digest(text.as_bytes());
        digest
            .iter()
            .take(Self::DIM)
            .map(|&byte| (byte as f32 / 127.5) - 1.0)
            .collect()
    }
}

impl EmbeddingBackend for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector_for(text))
    }

    fn dimensions(&self) -> usize {
        Self::DIM
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
}
