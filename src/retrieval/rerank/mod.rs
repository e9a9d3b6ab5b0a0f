//! Re-ranking
//!
//! A re-ranker scores each (question, passage) pair on its own; candidates
//! are re-ordered by that score and optionally cut to the best `top_n`.

use crate::embedding::{cosine_similarity, Embedder};
use crate::retrieval::Candidate;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Default number of passages kept after re-ranking
pub const DEFAULT_TOP_N: usize = 3;

/// Trait for relevance re-rankers
pub trait Reranker: Send + Sync {
    /// Relevance of `passage` to `query` (higher is better)
    fn score(&self, query: &str, passage: &str) -> Result<f32>;

    /// Get the name of this re-ranker
    fn name(&self) -> &str;
}

/// Re-ranker scoring by cosine similarity of query and passage embeddings
pub struct EmbeddingReranker {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingReranker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl Reranker for EmbeddingReranker {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        let query_embedding = self.embedder.embed(query).context("Failed to embed query")?;
        let passage_embedding = self
            .embedder
            .embed(passage)
            .context("Failed to embed passage")?;
        Ok(cosine_similarity(&query_embedding, &passage_embedding))
    }

    fn name(&self) -> &str {
        self.embedder.model_name()
    }
}

/// Score every candidate, sort by score descending and keep the best `top_n`
///
/// Equal scores keep their incoming (fused) order. Ranks are reassigned from 1.
pub fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    candidates: Vec<Candidate>,
    top_n: Option<usize>,
) -> Result<Vec<Candidate>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for mut candidate in candidates {
        let score = reranker.score(query, &candidate.chunk.content)?;
        if score.is_nan() {
            anyhow::bail!(
                "Re-ranker '{}' returned NaN for chunk {}",
                reranker.name(),
                candidate.chunk.id
            );
        }
        candidate.rerank_score = Some(score);
        scored.push((score, candidate));
    }

    scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
    if let Some(top_n) = top_n {
        scored.truncate(top_n);
    }

    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(idx, (_, mut candidate))| {
            candidate.rank = idx + 1;
            candidate
        })
        .collect())
}
