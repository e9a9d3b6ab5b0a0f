//! Chain wiring from [`RagSettings`]

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::RagSettings;
use crate::embedding::{create_embedder, Embedder};
use crate::generation::Generator;
use crate::retrieval::{
    Bm25Retriever, EmbeddingReranker, EnsembleMember, EnsembleRetriever, HnswRetriever,
    RetrieverFusion,
};

use super::chain::ConversationalChain;
use super::service::ChatService;

/// Lexical and vector retrievers merged by the weighted ensemble
///
/// The lexical retriever is the first member, so it wins ties.
pub fn load_ensemble(settings: &RagSettings, embedder: Arc<dyn Embedder>) -> Result<EnsembleRetriever> {
    let retriever = &settings.retriever;

    let lexical = Bm25Retriever::load(&retriever.bm25.path)
        .with_context(|| format!("Failed to load BM25 store {:?}", retriever.bm25.path))?;
    let vector = HnswRetriever::load_with_config(
        &settings.vector_db.path,
        embedder,
        settings.vector_db.hnsw.clone(),
    )
    .with_context(|| format!("Failed to load vector store {:?}", settings.vector_db.path))?;

    tracing::info!(
        "Ensemble: bm25 ({} chunks, k={}, w={}) + {} ({} chunks, k={}, w={})",
        lexical.len(),
        retriever.bm25.k,
        retriever.weights.lexical,
        settings.vector_db.name,
        vector.len(),
        retriever.db.k,
        retriever.weights.vector
    );

    EnsembleRetriever::new(
        vec![
            EnsembleMember::new(Arc::new(lexical), retriever.weights.lexical, retriever.bm25.k),
            EnsembleMember::new(Arc::new(vector), retriever.weights.vector, retriever.db.k),
        ],
        retriever.c,
    )
}

/// Ensemble plus embedding re-ranker
pub fn load_fusion(settings: &RagSettings) -> Result<RetrieverFusion> {
    settings.validate()?;

    let embedder = create_embedder(&settings.embedding)?;
    let ensemble = load_ensemble(settings, embedder.clone())?;

    let fusion = RetrieverFusion::new(ensemble, Arc::new(EmbeddingReranker::new(embedder)));
    Ok(match settings.reranker.top_n {
        Some(top_n) => fusion.with_top_n(top_n),
        None => fusion,
    })
}

/// Build the conversational chain around `generator`
pub fn load_chain(settings: &RagSettings, generator: Arc<dyn Generator>) -> Result<ConversationalChain> {
    let fusion = load_fusion(settings)?;
    tracing::info!("Chain ready with generator '{}'", generator.model_name());

    Ok(ConversationalChain::new(fusion, generator).with_config(settings.chain.clone()))
}

/// Service that loads its chain on first use
pub fn lazy_service(settings: RagSettings, generator: Arc<dyn Generator>) -> ChatService {
    ChatService::new(move || load_chain(&settings, generator.clone()))
}

/// Local Qwen2 generator from the `model` group
#[cfg(feature = "candle")]
pub fn load_generator(settings: &RagSettings) -> Result<Arc<dyn Generator>> {
    use crate::generation::candle::{load_local_generator, DevicePreference};

    let model = settings
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Settings have no model group"))?;
    let device: DevicePreference = model.device.parse()?;

    let generator = load_local_generator(&model.path, device, &model.dtype, settings.generation.clone())?;
    Ok(Arc::new(generator))
}

/// Service that loads the local model and its chain on first use
#[cfg(feature = "candle")]
pub fn local_service(settings: RagSettings) -> ChatService {
    ChatService::new(move || {
        let generator = load_generator(&settings)?;
        load_chain(&settings, generator)
    })
}
