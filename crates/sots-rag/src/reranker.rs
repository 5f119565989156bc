//! Reranking of merged query candidates.
//!
//! The default [`HeuristicReranker`] boosts chunks that carry symbol or tag
//! hits and chunks that mention query tokens verbatim. Bonuses are never
//! negative, so a reranked hit never scores below its merged score.

use tracing::debug;

/// A candidate to be reranked.
#[derive(Debug, Clone)]
pub struct RerankerDoc<'a> {
    pub id: &'a str,
    pub text: &'a str,
    pub score: f64,
    pub symbol_hits: usize,
    pub tag_hits: usize,
}

/// Result of reranking a single candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    pub id: String,
    /// New score, merged score plus bonus
    pub score: f64,
    pub bonus: f64,
}

/// Trait for reranking search results.
pub trait Reranker {
    /// Rescore `documents` against the query. Results are in input order.
    fn rerank(&self, query_tokens: &[String], documents: &[RerankerDoc<'_>]) -> Vec<RerankResult>;
}

/// Additive bonuses for structural and lexical evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicReranker {
    pub symbol_bonus: f64,
    pub tag_bonus: f64,
    pub token_bonus: f64,
}

impl Default for HeuristicReranker {
    fn default() -> Self {
        Self {
            symbol_bonus: 0.2,
            tag_bonus: 0.1,
            token_bonus: 0.01,
        }
    }
}

impl HeuristicReranker {
    fn bonus(&self, query_tokens: &[String], doc: &RerankerDoc<'_>) -> f64 {
        let text = doc.text.to_lowercase();
        let token_matches = query_tokens
            .iter()
            .filter(|t| !t.is_empty() && text.contains(&t.to_lowercase()))
            .count();
        doc.symbol_hits as f64 * self.symbol_bonus
            + doc.tag_hits as f64 * self.tag_bonus
            + token_matches as f64 * self.token_bonus
    }
}

impl Reranker for HeuristicReranker {
    fn rerank(&self, query_tokens: &[String], documents: &[RerankerDoc<'_>]) -> Vec<RerankResult> {
        debug!("Reranking {} candidates", documents.len());
        documents
            .iter()
            .map(|doc| {
                let bonus = self.bonus(query_tokens, doc);
                RerankResult {
                    id: doc.id.to_string(),
                    score: doc.score + bonus,
                    bonus,
                }
            })
            .collect()
    }
}
