//! # chatrag
//!
//! Conversational retrieval-augmented question answering.
//!
//! ## Overview
//!
//! A question and the prior turns go through one chain:
//!
//! - the question is condensed against the history into a standalone question
//! - BM25 and HNSW retrievers are merged by weighted reciprocal rank fusion
//! - the merged passages are re-ranked and stuffed into an answer prompt
//! - a causal LM generates the answer token by token, blocking or streaming
//!
//! ## Architecture
//!
//! - `data` - Passage records and passage stores
//! - `embedding` - Embedder trait and deterministic backends
//! - `retrieval` - Sparse, dense and ensemble retrieval, re-ranking, fusion
//! - `generation` - Incremental generation loop over a causal LM
//! - `rag` - Prompts, memory, the conversational chain and the chat service
//! - `config` - Typed settings
//! - `utils` - Logging setup

pub mod config;
pub mod data;
pub mod embedding;
pub mod generation;
pub mod rag;
pub mod retrieval;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use anyhow::{Error, Result};
pub use config::RagSettings;
pub use rag::{ChatService, ConversationalChain};
