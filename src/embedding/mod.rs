//! Embedding interface
//!
//! Embedding model inference is an external collaborator; the vector
//! retriever and the embedding re-ranker only see the [`Embedder`] trait.
//! Deterministic backends in [`backends`] stand in when no model is wired.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod backends;

pub use backends::*;

/// Represents an embedding vector
pub type Embedding = Vec<f32>;

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Model name or path
    pub model_name: String,
    /// Backend: token or mock
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Embedding dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Whether to normalize embeddings
    #[serde(default = "default_normalize")]
    pub normalize: bool,
}

fn default_backend() -> String {
    "token".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_normalize() -> bool {
    true
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "token-embedder".to_string(),
            backend: default_backend(),
            dimension: default_dimension(),
            normalize: default_normalize(),
        }
    }
}

/// Text to dense vector
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// One vector per text, in input order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Scale to unit length; the zero vector is left as is
pub fn normalize_embedding(embedding: &mut Embedding) {
    let norm = l2_norm(embedding);
    if norm > 0.0 {
        embedding.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine of the angle between two vectors
///
/// 0.0 for vectors of different length or with zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norms = l2_norm(a) * l2_norm(b);
    if a.len() != b.len() || norms == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / norms
}
