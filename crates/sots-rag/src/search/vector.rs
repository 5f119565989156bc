//! Flat cosine-similarity vector store keyed by chunk id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::SCHEMA_VERSION;

/// Serialized form of a [`VectorStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub schema_version: u32,
    /// Embedding model that produced the vectors
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub dim: usize,
    pub vectors: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
struct StoredVector {
    values: Vec<f32>,
    norm: f32,
}

/// In-memory vector store with precomputed L2 norms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    entries: BTreeMap<String, StoredVector>,
    model: String,
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store tagged with the embedding model name.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            entries: BTreeMap::new(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Store a vector, replacing any previous entry for the id.
    ///
    /// A vector whose length differs from the store's dimension is refused.
    pub fn add(&mut self, chunk_id: &str, vector: Vec<f32>) -> bool {
        let dim = self.dim_excluding(chunk_id);
        if dim != 0 && vector.len() != dim {
            warn!(
                chunk_id,
                expected = dim,
                actual = vector.len(),
                "Skipping vector with mismatched dimension"
            );
            return false;
        }
        let norm = l2_norm(&vector);
        self.entries.insert(
            chunk_id.to_string(),
            StoredVector {
                values: vector,
                norm,
            },
        );
        true
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        self.entries.remove(chunk_id).is_some()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.entries.get(chunk_id).map(|e| e.values.as_slice())
    }

    /// Dimension of the stored vectors, 0 when empty.
    pub fn get_dim(&self) -> usize {
        self.entries
            .values()
            .next()
            .map(|e| e.values.len())
            .unwrap_or(0)
    }

    fn dim_excluding(&self, chunk_id: &str) -> usize {
        self.entries
            .iter()
            .find(|(id, _)| id.as_str() != chunk_id)
            .map(|(_, e)| e.values.len())
            .unwrap_or(0)
    }

    /// Top `top_k` entries by cosine similarity, best first.
    ///
    /// Entries whose dimension differs from the query are skipped and a
    /// zero-norm vector on either side scores 0.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        if top_k == 0 || query.is_empty() {
            return Vec::new();
        }
        let query_norm = l2_norm(query);

        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.values.len() == query.len())
            .map(|(id, entry)| {
                let denom = entry.norm * query_norm;
                let similarity = if denom == 0.0 || !denom.is_finite() {
                    0.0
                } else {
                    let dot: f32 = entry.values.iter().zip(query).map(|(a, b)| a * b).sum();
                    (dot / denom).clamp(-1.0, 1.0)
                };
                (id.clone(), similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_snapshot(&self) -> VectorSnapshot {
        VectorSnapshot {
            schema_version: SCHEMA_VERSION,
            model: self.model.clone(),
            dim: self.get_dim(),
            vectors: self
                .entries
                .iter()
                .map(|(id, e)| (id.clone(), e.values.clone()))
                .collect(),
        }
    }

    /// Rebuild a store from its snapshot, recomputing norms.
    pub fn from_snapshot(snapshot: VectorSnapshot) -> Self {
        let mut store = Self::for_model(snapshot.model);
        for (id, values) in snapshot.vectors {
            store.add(&id, values);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_dim() {
        let mut store = VectorStore::new();
        assert_eq!(store.get_dim(), 0);
        assert!(store.add("a", vec![1.0, 0.0, 0.0]));
        assert_eq!(store.get_dim(), 3);
        assert!(!store.add("b", vec![1.0, 0.0]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_overwrite_allows_same_id() {
        let mut store = VectorStore::new();
        store.add("a", vec![1.0, 0.0]);
        assert!(store.add("a", vec![0.0, 1.0]));
        assert_eq!(store.get("a"), Some(&[0.0, 1.0][..]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_search_orders_by_cosine() {
        let mut store = VectorStore::new();
        store.add("same", vec![1.0, 0.0]);
        store.add("orthogonal", vec![0.0, 1.0]);
        store.add("opposite", vec![-2.0, 0.0]);

        let results = store.search(&[3.0, 0.0], 10);
        assert_eq!(results[0].0, "same");
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(results[1].0, "orthogonal");
        assert_eq!(results[2].0, "opposite");
        assert!((results[2].1 + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_bounds_and_limit() {
        let mut store = VectorStore::new();
        for i in 0..10 {
            let x = i as f32 - 5.0;
            store.add(&format!("v{}", i), vec![x, 1.0, -x * 0.5]);
        }
        let results = store.search(&[0.3, -0.7, 2.0], 4);
        assert_eq!(results.len(), 4);
        for (_, sim) in &results {
            assert!((-1.0..=1.0).contains(sim));
        }
        assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let mut store = VectorStore::new();
        store.add("zero", vec![0.0, 0.0]);
        store.add("one", vec![1.0, 1.0]);

        let results = store.search(&[1.0, 0.0], 10);
        let zero = results.iter().find(|(id, _)| id == "zero").unwrap();
        assert_eq!(zero.1, 0.0);

        let results = store.search(&[0.0, 0.0], 10);
        assert!(results.iter().all(|(_, s)| *s == 0.0));
    }

    #[test]
    fn test_search_skips_mismatched_query_dim() {
        let mut store = VectorStore::new();
        store.add("a", vec![1.0, 0.0, 0.0]);
        assert!(store.search(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut store = VectorStore::new();
        store.add("a", vec![1.0]);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
        assert_eq!(store.get_dim(), 0);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut store = VectorStore::for_model("hash");
        store.add("a", vec![0.25, -0.5, 1.0]);
        store.add("b", vec![0.1, 0.2, 0.3]);

        let snapshot = store.to_snapshot();
        assert_eq!(snapshot.dim, 3);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = VectorStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored, store);
        assert_eq!(restored.model(), "hash");
    }
}
