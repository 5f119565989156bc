//! BM25 keyword scoring with incremental add/remove.
//!
//! The index keeps a term-frequency counter per chunk instead of the raw
//! token stream, so removing a chunk retracts exactly what adding it
//! contributed to the global document-frequency table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SCHEMA_VERSION;

/// Default term frequency saturation.
pub const DEFAULT_K1: f64 = 1.5;
/// Default length normalization.
pub const DEFAULT_B: f64 = 0.75;

/// Split text into lowercase `[A-Za-z0-9_]` runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

/// Serialized form of a [`BM25Index`].
///
/// Ordered maps keep the JSON byte-stable between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Snapshot {
    pub schema_version: u32,
    pub k1: f64,
    pub b: f64,
    pub chunk_terms: BTreeMap<String, BTreeMap<String, u32>>,
    pub doc_lengths: BTreeMap<String, u32>,
    pub term_doc_freq: BTreeMap<String, u32>,
}

/// BM25 search index
#[derive(Debug, Clone, PartialEq)]
pub struct BM25Index {
    k1: f64,
    b: f64,
    /// Term frequencies per chunk
    chunk_terms: BTreeMap<String, BTreeMap<String, u32>>,
    /// Chunk lengths (in tokens)
    doc_lengths: BTreeMap<String, u32>,
    /// Number of chunks containing each term
    term_doc_freq: BTreeMap<String, u32>,
}

impl BM25Index {
    /// Create a new empty index with the default parameters.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            chunk_terms: BTreeMap::new(),
            doc_lengths: BTreeMap::new(),
            term_doc_freq: BTreeMap::new(),
        }
    }

    /// Change the scoring parameters. Term statistics are unaffected.
    pub fn set_params(&mut self, k1: f64, b: f64) {
        self.k1 = k1;
        self.b = b;
    }

    /// Add a chunk, retracting any previous contribution under the same id.
    pub fn add_document<S: AsRef<str>>(&mut self, chunk_id: &str, tokens: &[S]) {
        self.remove_document(chunk_id);

        let mut freq: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *freq.entry(token.as_ref().to_string()).or_insert(0) += 1;
        }

        let length: u32 = freq.values().sum();
        for term in freq.keys() {
            *self.term_doc_freq.entry(term.clone()).or_insert(0) += 1;
        }

        self.doc_lengths.insert(chunk_id.to_string(), length);
        self.chunk_terms.insert(chunk_id.to_string(), freq);
    }

    /// Remove a chunk from the index. Returns false if it was not present.
    pub fn remove_document(&mut self, chunk_id: &str) -> bool {
        let Some(freq) = self.chunk_terms.remove(chunk_id) else {
            return false;
        };

        for term in freq.keys() {
            if let Some(count) = self.term_doc_freq.get_mut(term) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.term_doc_freq.remove(term);
                }
            }
        }
        self.doc_lengths.remove(chunk_id);
        true
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunk_terms.contains_key(chunk_id)
    }

    /// Number of indexed chunks.
    pub fn total_docs(&self) -> usize {
        self.chunk_terms.len()
    }

    /// Mean token count across all chunks, 0.0 for an empty index.
    pub fn avg_doc_len(&self) -> f64 {
        let count = self.total_docs();
        if count == 0 {
            return 0.0;
        }
        let total: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        total as f64 / count as f64
    }

    /// Number of chunks containing `term`.
    pub fn doc_freq(&self, term: &str) -> u32 {
        self.term_doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Calculate IDF for a term
    fn idf(&self, term: &str) -> f64 {
        let n = self.total_docs() as f64;
        if n == 0.0 {
            return 0.0;
        }
        let df = self.doc_freq(term) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn score_with_avg(&self, query_tokens: &[String], chunk_id: &str, avg_len: f64) -> f64 {
        let Some(freq) = self.chunk_terms.get(chunk_id) else {
            return 0.0;
        };

        let doc_len = self.doc_lengths.get(chunk_id).copied().unwrap_or(0) as f64;
        let length_ratio = if avg_len > 0.0 { doc_len / avg_len } else { 0.0 };

        let mut score = 0.0;
        for term in query_tokens {
            let tf = freq.get(term).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            let denominator = tf + self.k1 * (1.0 - self.b + self.b * length_ratio);
            if denominator == 0.0 {
                continue;
            }
            score += self.idf(term) * (tf * (self.k1 + 1.0)) / denominator;
        }
        score
    }

    /// Okapi BM25 score of one chunk for the given query tokens.
    pub fn score(&self, query_tokens: &[String], chunk_id: &str) -> f64 {
        self.score_with_avg(query_tokens, chunk_id, self.avg_doc_len())
    }

    /// Score every indexed chunk. An empty query matches nothing.
    pub fn score_all(&self, query_tokens: &[String]) -> BTreeMap<String, f64> {
        if query_tokens.is_empty() {
            return BTreeMap::new();
        }
        let avg_len = self.avg_doc_len();
        self.chunk_terms
            .keys()
            .map(|id| (id.clone(), self.score_with_avg(query_tokens, id, avg_len)))
            .collect()
    }

    /// Top `limit` chunks with a positive score, best first.
    pub fn search(&self, query_tokens: &[String], limit: usize) -> Vec<(String, f64)> {
        let mut scores: Vec<(String, f64)> = self
            .score_all(query_tokens)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(limit);
        scores
    }

    pub fn len(&self) -> usize {
        self.total_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_terms.is_empty()
    }

    pub fn to_snapshot(&self) -> Bm25Snapshot {
        Bm25Snapshot {
            schema_version: SCHEMA_VERSION,
            k1: self.k1,
            b: self.b,
            chunk_terms: self.chunk_terms.clone(),
            doc_lengths: self.doc_lengths.clone(),
            term_doc_freq: self.term_doc_freq.clone(),
        }
    }

    pub fn from_snapshot(snapshot: Bm25Snapshot) -> Self {
        Self {
            k1: snapshot.k1,
            b: snapshot.b,
            chunk_terms: snapshot.chunk_terms,
            doc_lengths: snapshot.doc_lengths,
            term_doc_freq: snapshot.term_doc_freq,
        }
    }

    pub fn doc_lengths(&self) -> &BTreeMap<String, u32> {
        &self.doc_lengths
    }

    pub fn term_doc_freq(&self) -> &BTreeMap<String, u32> {
        &self.term_doc_freq
    }
}

impl Default for BM25Index {
    fn default() -> Self {
        Self::new()
    }
}
