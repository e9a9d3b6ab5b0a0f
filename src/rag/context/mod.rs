//! Prompt construction for the conversational chain

pub mod builder;
pub mod templates;

pub use builder::{format_history, ContextBuilder};
pub use templates::{render, PromptTemplates, CONDENSE_TEMPLATE, QA_TEMPLATE};
