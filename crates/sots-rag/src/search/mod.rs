//! Candidate retrieval and merging.
//!
//! Exact symbol/tag hits, BM25 candidates and vector candidates are merged
//! into one ranking with a weighted sum of normalized, non-negative
//! components. Because no component can be negative, a chunk found by
//! more than one method never ranks below the same chunk found by fewer.

pub mod bm25;
pub mod vector;

pub use bm25::{tokenize, BM25Index, Bm25Snapshot};
pub use vector::{VectorSnapshot, VectorStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Weights applied to each normalized score component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeWeights {
    pub exact: f64,
    pub bm25: f64,
    pub vector: f64,
}

impl Default for MergeWeights {
    fn default() -> Self {
        Self {
            exact: 3.0,
            bm25: 1.0,
            vector: 0.5,
        }
    }
}

/// Per-method contributions to a merged score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<f64>,
    /// Raw BM25 score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25: Option<f64>,
    /// Raw cosine similarity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<f64>,
    /// Bonus added by the reranker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<f64>,
}

/// A merged candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedHit {
    pub chunk_id: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Map a cosine similarity from `[-1, 1]` onto `[0, 1]`.
fn normalize_cosine(similarity: f64) -> f64 {
    ((1.0 + similarity) / 2.0).clamp(0.0, 1.0)
}

/// Merge exact, lexical and vector candidates into one ranking.
///
/// BM25 scores are divided by the best BM25 score among the candidates so
/// both retrieval methods contribute on the same `[0, 1]` scale. Ties are
/// broken by chunk id.
pub fn merge_candidates(
    exact_ids: &[String],
    bm25_results: &[(String, f64)],
    vector_results: &[(String, f32)],
    weights: MergeWeights,
) -> Vec<MergedHit> {
    let mut breakdowns: BTreeMap<String, ScoreBreakdown> = BTreeMap::new();

    for id in exact_ids {
        breakdowns.entry(id.clone()).or_default().exact = Some(1.0);
    }
    for (id, score) in bm25_results {
        let entry = breakdowns.entry(id.clone()).or_default();
        entry.bm25 = Some(entry.bm25.map_or(*score, |s| s.max(*score)));
    }
    for (id, similarity) in vector_results {
        let entry = breakdowns.entry(id.clone()).or_default();
        let similarity = *similarity as f64;
        entry.vector = Some(entry.vector.map_or(similarity, |s| s.max(similarity)));
    }

    let max_bm25 = bm25_results
        .iter()
        .map(|(_, s)| *s)
        .fold(0.0_f64, f64::max);

    let mut hits: Vec<MergedHit> = breakdowns
        .into_iter()
        .map(|(chunk_id, breakdown)| {
            let mut score = 0.0;
            if let Some(exact) = breakdown.exact {
                score += weights.exact * exact;
            }
            if let Some(bm25) = breakdown.bm25 {
                if max_bm25 > 0.0 {
                    score += weights.bm25 * (bm25 / max_bm25).max(0.0);
                }
            }
            if let Some(vector) = breakdown.vector {
                score += weights.vector * normalize_cosine(vector);
            }
            MergedHit {
                chunk_id,
                score,
                breakdown,
            }
        })
        .collect();

    sort_hits(&mut hits);
    hits
}

/// Sort hits by score descending, then chunk id ascending.
pub fn sort_hits(hits: &mut [MergedHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
