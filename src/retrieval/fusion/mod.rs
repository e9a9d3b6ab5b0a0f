//! Retriever fusion
//!
//! The retrieval stage of the conversational chain: lexical and vector
//! retrievers merged by the weighted ensemble, then re-ranked.

use crate::retrieval::{rerank, Candidate, EnsembleRetriever, Reranker};
use anyhow::Result;
use std::sync::Arc;

/// Ensemble retrieval followed by a re-ranking pass
pub struct RetrieverFusion {
    ensemble: EnsembleRetriever,
    reranker: Arc<dyn Reranker>,
    top_n: Option<usize>,
}

impl RetrieverFusion {
    /// Create a fusion stage that keeps every re-ranked candidate
    pub fn new(ensemble: EnsembleRetriever, reranker: Arc<dyn Reranker>) -> Self {
        Self {
            ensemble,
            reranker,
            top_n: None,
        }
    }

    /// Keep only the best `top_n` candidates after re-ranking
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn ensemble(&self) -> &EnsembleRetriever {
        &self.ensemble
    }

    /// Retrieve, merge and re-rank passages for a question
    ///
    /// Retriever failures are returned as-is; there is no fallback to a single
    /// retriever.
    pub fn fuse(&self, question: &str) -> Result<Vec<Candidate>> {
        let candidates = self.ensemble.candidates(question)?;
        let fused = candidates.len();

        let reranked = rerank(self.reranker.as_ref(), question, candidates, self.top_n)?;

        tracing::debug!(
            "Fused {} candidates, kept {} after re-ranking with '{}'",
            fused,
            reranked.len(),
            self.reranker.name()
        );
        Ok(reranked)
    }
}
