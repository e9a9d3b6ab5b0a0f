//! Text generation
//!
//! Trait-based abstraction over causal language models. A [`CausalLm`]
//! exposes one forward pass; [`InteractiveGeneration`] drives it token by
//! token; a [`Generator`] is what the conversational chain talks to.

pub mod config;
pub mod interactive;
pub mod logits;
pub mod sampling;

#[cfg(feature = "candle")]
pub mod candle;

pub use config::{
    GenerationConfig, GenerationOverrides, LengthWarning, ResolvedGeneration, DEFAULT_MAX_LENGTH,
};
pub use interactive::{GenerationState, InteractiveGeneration};
pub use logits::{LogitsProcessor, PrefixAllowedTokensFn, StoppingCriteria};

use anyhow::Result;
use std::sync::{Arc, Mutex};

/// A causal language model with incremental decoding state
pub trait CausalLm: Send {
    /// Scores over the vocabulary for the token following `input_ids`
    ///
    /// `input_ids` holds only the tokens the model has not seen yet;
    /// `past_len` is how many tokens precede them in the cached state.
    fn forward(&mut self, input_ids: &[u32], past_len: usize) -> Result<Vec<f32>>;

    /// Drop any incremental decoding state (KV cache)
    fn reset(&mut self) {}

    /// The model's default generation settings
    fn generation_config(&self) -> &GenerationConfig;
}

impl<L: CausalLm + ?Sized> CausalLm for Box<L> {
    fn forward(&mut self, input_ids: &[u32], past_len: usize) -> Result<Vec<f32>> {
        (**self).forward(input_ids, past_len)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn generation_config(&self) -> &GenerationConfig {
        (**self).generation_config()
    }
}

/// Text to token ids and back
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, token_ids: &[u32]) -> Result<String>;
}

/// Trait for text generation models
///
/// Implementations provide both single-shot and streaming generation. A
/// stream yields the full answer so far at each step, so its last item is
/// the complete answer.
pub trait Generator: Send + Sync {
    /// Generate a response given a prompt
    ///
    /// The default drains [`Generator::generate_stream`] and keeps the last
    /// item, which keeps blocking and streaming output identical.
    fn generate(&self, prompt: &str, overrides: &GenerationOverrides) -> Result<String> {
        let mut answer = String::new();
        for partial in self.generate_stream(prompt, overrides)? {
            answer = partial?;
        }
        Ok(answer)
    }

    /// Generate with streaming output
    fn generate_stream(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Generator over a local [`CausalLm`]
///
/// The model sits behind a mutex: one generation runs at a time and a
/// stream holds the lock until it is dropped.
pub struct LocalGenerator {
    model: Mutex<Box<dyn CausalLm>>,
    tokenizer: Arc<dyn Tokenizer>,
    name: String,
    config: Option<GenerationConfig>,
}

impl LocalGenerator {
    pub fn new(
        model: Box<dyn CausalLm>,
        tokenizer: Arc<dyn Tokenizer>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            tokenizer,
            name: name.into(),
            config: None,
        }
    }

    /// Replace the model's own generation defaults
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl Generator for LocalGenerator {
    fn generate_stream(
        &self,
        prompt: &str,
        overrides: &GenerationOverrides,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>> {
        let model = self
            .model
            .lock()
            .map_err(|e| anyhow::anyhow!("Model lock poisoned: {}", e))?;

        let mut generation = InteractiveGeneration::new(model, self.tokenizer.clone(), prompt)
            .with_overrides(overrides.clone());
        if let Some(config) = &self.config {
            generation = generation.with_config(config);
        }
        Ok(Box::new(generation))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
