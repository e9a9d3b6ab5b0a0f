//! Retrieval engines
//!
//! Dense (HNSW) and sparse (BM25) retrievers, the weighted ensemble that merges
//! them, and the re-ranking pass applied on top.

use crate::data::Chunk;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod dense;
pub mod fusion;
pub mod hybrid;
pub mod rerank;
pub mod sparse;

// Re-exports
pub use dense::*;
pub use fusion::*;
pub use hybrid::*;
pub use rerank::*;
pub use sparse::*;

/// Search result with chunk and relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk ID
    pub chunk_id: String,
    /// The actual chunk content and metadata
    pub chunk: Chunk,
    /// Relevance score (higher is better)
    pub score: f32,
    /// Rank in the result list (1-indexed)
    pub rank: usize,
}

impl SearchResult {
    /// Build a result for a chunk at the given 1-indexed rank
    pub fn new(chunk: Chunk, score: f32, rank: usize) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            chunk,
            score,
            rank,
        }
    }
}

/// One retriever's opinion about a candidate passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverHit {
    /// Name of the retriever that returned the passage
    pub retriever: String,
    /// Position in that retriever's list (1-indexed)
    pub rank: usize,
    /// Score the retriever assigned
    pub score: f32,
}

/// A passage considered for one question-answer turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk: Chunk,
    /// Hits in ensemble member order
    pub hits: Vec<RetrieverHit>,
    /// Weighted reciprocal-rank score from the ensemble
    pub fused_score: f32,
    /// Score from the re-ranker, once re-ranked
    pub rerank_score: Option<f32>,
    /// Final position (1-indexed)
    pub rank: usize,
}

impl Candidate {
    /// Best (lowest) rank any retriever gave this passage
    pub fn best_rank(&self) -> usize {
        self.hits.iter().map(|hit| hit.rank).min().unwrap_or(usize::MAX)
    }

    /// Score used for final ordering: re-rank score when present
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

impl From<Candidate> for SearchResult {
    fn from(candidate: Candidate) -> Self {
        let score = candidate.score();
        SearchResult::new(candidate.chunk, score, candidate.rank)
    }
}

/// Trait for retrieval engines
pub trait Retriever: Send + Sync {
    /// Retrieve top-k most relevant chunks for a query
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>>;

    /// Get the name of this retriever
    fn name(&self) -> &str;
}
