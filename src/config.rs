//! Typed settings for building a conversational chain
//!
//! Loaded once from JSON and validated before anything is constructed.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embedding::EmbeddingConfig;
use crate::generation::GenerationConfig;
use crate::rag::ChainConfig;
use crate::retrieval::{HnswConfig, DEFAULT_RRF_C, DEFAULT_TOP_N};

/// The only vector store kind
pub const HNSW_STORE: &str = "hnsw";

/// All parameter groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    pub vector_db: VectorDbSettings,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub retriever: RetrieverSettings,
    #[serde(default)]
    pub reranker: RerankerSettings,
    /// Replaces the model's own generation defaults when set
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
    #[serde(default)]
    pub chain: ChainConfig,
    /// Local model directory, used by the `candle` loader
    #[serde(default)]
    pub model: Option<ModelSettings>,
}

/// Vector store kind and the directory holding its passage store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDbSettings {
    #[serde(default = "default_store")]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub hnsw: HnswConfig,
}

fn default_store() -> String {
    HNSW_STORE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverSettings {
    /// Vector retriever
    pub db: DbRetrieverSettings,
    /// Lexical retriever
    pub bm25: Bm25Settings,
    #[serde(default)]
    pub weights: FusionWeights,
    /// Reciprocal-rank constant
    #[serde(default = "default_rrf_c")]
    pub c: f32,
}

fn default_rrf_c() -> f32 {
    DEFAULT_RRF_C
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRetrieverSettings {
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25Settings {
    pub path: PathBuf,
    pub k: usize,
}

/// Ensemble weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub lexical: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    /// Candidates kept after re-ranking; `None` keeps all
    pub top_n: Option<usize>,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            top_n: Some(DEFAULT_TOP_N),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub path: PathBuf,
    /// cuda, metal, cpu or auto
    #[serde(default = "default_device")]
    pub device: String,
    /// f32, f16 or bf16
    #[serde(default = "default_dtype")]
    pub dtype: String,
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_dtype() -> String {
    "f32".to_string()
}

impl RagSettings {
    /// Load and validate settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        Self::from_json_str(&content).with_context(|| format!("Invalid settings in {:?}", path))
    }

    /// Parse and validate settings from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json).context("Failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every parameter group
    pub fn validate(&self) -> Result<()> {
        if self.vector_db.name != HNSW_STORE {
            bail!(
                "Unknown vector store '{}'. Supported: {}",
                self.vector_db.name,
                HNSW_STORE
            );
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be positive");
        }

        let retriever = &self.retriever;
        if retriever.db.k == 0 {
            bail!("retriever.db.k must be positive");
        }
        if retriever.bm25.k == 0 {
            bail!("retriever.bm25.k must be positive");
        }

        let (lexical, vector) = (retriever.weights.lexical, retriever.weights.vector);
        for (name, weight) in [("lexical", lexical), ("vector", vector)] {
            if !weight.is_finite() || weight < 0.0 {
                bail!("retriever.weights.{} must be a non-negative number, got {}", name, weight);
            }
        }
        if lexical + vector <= 0.0 {
            bail!("retriever.weights must not all be zero");
        }
        if !retriever.c.is_finite() || retriever.c < 0.0 {
            bail!("retriever.c must be a non-negative number, got {}", retriever.c);
        }

        if self.reranker.top_n == Some(0) {
            bail!("reranker.top_n must be positive");
        }

        if let Some(generation) = &self.generation {
            generation.validate().context("Invalid generation settings")?;
        }
        // Every chain call resolves these overrides on top of the defaults
        let mut effective = self.generation.clone().unwrap_or_default();
        self.chain.generation.apply(&mut effective);
        effective.validate().context("Invalid chain.generation overrides")?;
        Ok(())
    }
}
