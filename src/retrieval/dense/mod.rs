//! Dense retrieval using HNSW
//!
//! Approximate nearest neighbor search via hnsw_rs. The graph is rebuilt at
//! startup from the passage store, using persisted vectors when the store
//! carries them and embedding every passage otherwise.

use crate::data::{load_chunks, Chunk};
use crate::embedding::{Embedder, Embedding};
use crate::retrieval::{Retriever, SearchResult};
use anyhow::{Context, Result};
use hnsw_rs::hnsw::{Hnsw, Neighbour};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Optional file of precomputed passage vectors, aligned with `chunks.json`
pub const EMBEDDINGS_FILE: &str = "embeddings.json";

/// Configuration for HNSW index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum number of connections per layer (default: 16)
    pub max_connections: usize,
    /// Size of the dynamic candidate list (default: 200)
    pub ef_construction: usize,
    /// Maximum number of layers (default: 16)
    pub max_layers: u8,
    /// Candidate list size while searching (default: 30)
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            max_layers: 16,
            ef_search: 30,
        }
    }
}

/// Dense retriever using HNSW for approximate nearest neighbor search
pub struct HnswRetriever {
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// Chunks indexed by HNSW point ID
    chunks: Vec<Chunk>,
    /// Embedder for query encoding
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    ef_search: usize,
}

impl HnswRetriever {
    /// Build a new HNSW index from chunks and their embeddings
    pub fn build(
        chunks: Vec<Chunk>,
        embeddings: Vec<Embedding>,
        embedder: Arc<dyn Embedder>,
        config: HnswConfig,
    ) -> Result<Self> {
        if chunks.len() != embeddings.len() {
            anyhow::bail!(
                "Chunk count ({}) doesn't match embedding count ({})",
                chunks.len(),
                embeddings.len()
            );
        }

        if chunks.is_empty() {
            anyhow::bail!("Cannot build index with empty chunks");
        }

        let dimension = embeddings[0].len();
        if let Some(bad) = embeddings.iter().position(|e| e.len() != dimension) {
            anyhow::bail!(
                "Embedding {} has dimension {}, expected {}",
                bad,
                embeddings[bad].len(),
                dimension
            );
        }
        if embedder.dimension() != dimension {
            anyhow::bail!(
                "Embedder '{}' produces {} dimensions but the index holds {}",
                embedder.model_name(),
                embedder.dimension(),
                dimension
            );
        }

        tracing::debug!(
            "Building HNSW index: {} chunks, {} dimensions",
            chunks.len(),
            dimension
        );

        let hnsw: Hnsw<f32, DistCosine> = Hnsw::new(
            config.max_connections,
            chunks.len(),
            config.max_layers as usize,
            config.ef_construction,
            DistCosine,
        );

        for (point_id, embedding) in embeddings.iter().enumerate() {
            hnsw.insert((embedding.as_slice(), point_id));
        }

        Ok(Self {
            hnsw,
            chunks,
            embedder,
            dimension,
            ef_search: config.ef_search,
        })
    }

    /// Load the passage store from an index directory and rebuild the graph
    pub fn load(index_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::load_with_config(index_dir, embedder, HnswConfig::default())
    }

    /// [`HnswRetriever::load`] with explicit graph parameters
    pub fn load_with_config(
        index_dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: HnswConfig,
    ) -> Result<Self> {
        tracing::info!("Loading HNSW retriever from {:?}", index_dir);

        let chunks = load_chunks(index_dir)?;

        let embeddings_path = index_dir.join(EMBEDDINGS_FILE);
        let embeddings: Vec<Embedding> = if embeddings_path.exists() {
            let embeddings_json = fs::read_to_string(&embeddings_path)
                .with_context(|| format!("Failed to read {:?}", embeddings_path))?;
            serde_json::from_str(&embeddings_json)
                .with_context(|| format!("Failed to parse {:?}", embeddings_path))?
        } else {
            tracing::debug!("No {} found, embedding {} chunks", EMBEDDINGS_FILE, chunks.len());
            let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
            embedder.embed_batch(&texts)?
        };

        Self::build(chunks, embeddings, embedder, config)
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Retriever for HnswRetriever {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).context("Failed to embed query")?;
        if query_embedding.len() != self.dimension {
            anyhow::bail!(
                "Query embedding has dimension {}, index expects {}",
                query_embedding.len(),
                self.dimension
            );
        }

        let neighbors: Vec<Neighbour> =
            self.hnsw
                .search(query_embedding.as_slice(), top_k, self.ef_search.max(top_k));

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            if let Some(chunk) = self.chunks.get(neighbor.d_id) {
                // hnsw_rs returns cosine distance
                let score = 1.0 - neighbor.distance;
                results.push(SearchResult::new(chunk.clone(), score, results.len() + 1));
            }
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "hnsw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::save_chunks;
    use crate::embedding::{EmbeddingConfig, TokenEmbedder};
    use tempfile::tempdir;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(TokenEmbedder::new(EmbeddingConfig {
            dimension: 256,
            ..EmbeddingConfig::default()
        }))
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("chunk1", "doc1", "Rust is a systems programming language"),
            Chunk::new("chunk2", "doc1", "Python is great for data science"),
        ]
    }

    #[test]
    fn test_hnsw_build_and_search() {
        let embedder = embedder();
        let embeddings: Vec<Embedding> = chunks()
            .iter()
            .map(|c| embedder.embed(&c.content).unwrap())
            .collect();

        let retriever =
            HnswRetriever::build(chunks(), embeddings, embedder, HnswConfig::default()).unwrap();

        let results = retriever.retrieve("systems programming language", 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "chunk1");
        assert_eq!(results[0].rank, 1);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_hnsw_load_embeds_store() {
        let temp_dir = tempdir().unwrap();
        save_chunks(temp_dir.path(), &chunks()).unwrap();

        let loaded = HnswRetriever::load(temp_dir.path(), embedder()).unwrap();
        assert_eq!(loaded.len(), 2);

        let results = loaded.retrieve("data science", 1).unwrap();
        assert_eq!(results[0].chunk_id, "chunk2");
    }

    #[test]
    fn test_hnsw_load_rejects_misaligned_vectors() {
        let temp_dir = tempdir().unwrap();
        save_chunks(temp_dir.path(), &chunks()).unwrap();
        fs::write(temp_dir.path().join(EMBEDDINGS_FILE), "[[0.1, 0.2]]").unwrap();

        assert!(HnswRetriever::load(temp_dir.path(), embedder()).is_err());
    }

    #[test]
    fn test_hnsw_dimension_mismatch() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(HnswRetriever::build(chunks(), embeddings, embedder(), HnswConfig::default()).is_err());
    }
}
