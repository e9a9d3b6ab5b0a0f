//! Conversational retrieval chain
//!
//! # Architecture
//!
//! ```text
//! Question + history
//!     │
//!     ▼
//! ┌─────────────┐
//! │  Condense   │  ← skipped when the history is empty
//! └─────────────┘
//!     │
//!     ▼ Standalone question
//! ┌─────────────┐
//! │   Fusion    │  ← BM25 + HNSW ensemble, then re-rank
//! └─────────────┘
//!     │
//!     ▼ Candidates
//! ┌─────────────┐
//! │   Context   │  ← passages stuffed into the answer prompt
//! │   Builder   │
//! └─────────────┘
//!     │
//!     ▼ Prompt
//! ┌─────────────┐
//! │  Generator  │  ← blocking or streaming
//! └─────────────┘
//!     │
//!     ▼
//! ChainOutput (answer + sources), recorded in memory
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chatrag::rag::lazy_service;
//! use chatrag::RagSettings;
//!
//! let settings = RagSettings::from_file("config/rag.json")?;
//! let service = lazy_service(settings, generator);
//!
//! for partial in service.answer_streaming("How long do I steam fish?", &[])? {
//!     println!("{}", partial?);
//! }
//! ```

pub mod chain;
pub mod context;
pub mod loader;
pub mod memory;
pub mod query;
pub mod service;

// Re-exports for convenience
pub use chain::{ChainConfig, ChainEvent, ChainStream, ConversationalChain};
pub use context::{ContextBuilder, PromptTemplates};
pub use loader::{lazy_service, load_chain, load_ensemble, load_fusion};
#[cfg(feature = "candle")]
pub use loader::{load_generator, local_service};
pub use memory::{ConversationMemory, Message, Role};
pub use query::{ChainOutput, ChatTurn, Source};
pub use service::{AnswerStream, ChatService};
