//! Deterministic embedding backends
//!
//! Neither backend needs model weights: `token` hashes words into buckets
//! (so lexical overlap yields similarity), `mock` hashes the whole text.

use crate::embedding::{normalize_embedding, Embedder, Embedding, EmbeddingConfig};
use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Mock embedder for testing (generates random but deterministic embeddings)
pub struct MockEmbedder {
    config: EmbeddingConfig,
}

impl MockEmbedder {
    /// Create a new mock embedder
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// Generate a deterministic embedding based on text hash
    fn generate_embedding(&self, text: &str) -> Embedding {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut embedding = Vec::with_capacity(self.config.dimension);
        for _ in 0..self.config.dimension {
            // Simple LCG (Linear Congruential Generator)
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let value = ((state / 65536) % 10000) as f32 / 10000.0 - 0.5;
            embedding.push(value);
        }

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        embedding
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Bag-of-words embedder: each lowercased token is hashed into a bucket
pub struct TokenEmbedder {
    config: EmbeddingConfig,
}

impl TokenEmbedder {
    /// Create a new token-based embedder
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn generate_embedding(&self, text: &str) -> Embedding {
        let dimension = self.config.dimension;
        let mut embedding = vec![0.0; dimension];

        let tokens: Vec<String> = text
            .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();

        if tokens.is_empty() || dimension == 0 {
            return embedding;
        }

        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % dimension;
            embedding[idx] += 1.0;
        }

        let total_tokens = tokens.len() as f32;
        for val in embedding.iter_mut() {
            *val /= total_tokens;
        }

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        embedding
    }
}

impl Embedder for TokenEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Create an embedder from its configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    if config.dimension == 0 {
        anyhow::bail!("Embedding dimension must be > 0");
    }

    match config.backend.as_str() {
        "mock" => Ok(Arc::new(MockEmbedder::new(config.clone()))),
        "token" => Ok(Arc::new(TokenEmbedder::new(config.clone()))),
        other => anyhow::bail!("Unknown embedding backend: {}. Supported: token, mock", other),
    }
}
