//! Incremental generation loop
//!
//! [`InteractiveGeneration`] is a pull-based iterator over a causal language
//! model. Every call to `next` runs one decoding step and yields the whole
//! generated suffix so far, re-decoded from tokens, not just the newest piece.
//!
//! The loop moves through three states. `Initializing` runs lazily on the
//! first pull: the prompt is tokenized, settings are resolved on a private
//! copy, and processors, warpers and stopping criteria are assembled. Each
//! `Decoding` step runs a forward pass over the tokens not yet seen by the
//! model, processes and warps the scores, then picks a token, greedily or
//! by sampling. `Finished` is reached once every row has produced an
//! end-of-sequence id or a stopping criterion fires, and after any error.
//!
//! Dropping the iterator early leaves nothing to clean up; the model's
//! incremental state is reset on the next generation.

use crate::generation::config::{GenerationConfig, GenerationOverrides, ResolvedGeneration};
use crate::generation::logits::{
    LogitsProcessor, LogitsProcessorList, MaxLengthCriteria, PrefixAllowedTokensFn,
    PrefixConstrainedLogitsProcessor, RepetitionPenaltyLogitsProcessor, StoppingCriteria,
    StoppingCriteriaList, TemperatureLogitsWarper, TopKLogitsWarper, TopPLogitsWarper,
};
use crate::generation::sampling::{argmax, softmax, update_unfinished, TokenSampler};
use crate::generation::{CausalLm, Tokenizer};
use anyhow::{Context, Result};
use std::ops::DerefMut;
use std::sync::Arc;

/// Lifecycle of one generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Initializing,
    Decoding,
    Finished,
}

/// Everything built during initialization
struct DecodeState {
    input_ids: Vec<u32>,
    input_len: usize,
    /// Tokens already fed to the model
    cached_len: usize,
    resolved: ResolvedGeneration,
    processors: LogitsProcessorList,
    warpers: LogitsProcessorList,
    criteria: StoppingCriteriaList,
    sampler: TokenSampler,
    /// One flag per row; this path decodes a single row
    unfinished: Vec<bool>,
}

/// Token-by-token generation over a model handle
///
/// `M` is anything that dereferences mutably to a [`CausalLm`]: a `&mut`
/// borrow, a `Box`, or a held mutex guard.
pub struct InteractiveGeneration<M>
where
    M: DerefMut,
    M::Target: CausalLm,
{
    model: M,
    tokenizer: Arc<dyn Tokenizer>,
    prompt: String,
    config: Option<GenerationConfig>,
    overrides: GenerationOverrides,
    additional_eos_token_id: Option<u32>,
    extra_processors: Vec<Box<dyn LogitsProcessor>>,
    extra_criteria: Vec<Box<dyn StoppingCriteria>>,
    prefix_allowed_tokens: Option<PrefixAllowedTokensFn>,
    state: GenerationState,
    decode: Option<DecodeState>,
}

impl<M> InteractiveGeneration<M>
where
    M: DerefMut,
    M::Target: CausalLm,
{
    /// Generate a continuation of `prompt` using the model's own defaults
    pub fn new(model: M, tokenizer: Arc<dyn Tokenizer>, prompt: impl Into<String>) -> Self {
        Self {
            model,
            tokenizer,
            prompt: prompt.into(),
            config: None,
            overrides: GenerationOverrides::default(),
            additional_eos_token_id: None,
            extra_processors: Vec::new(),
            extra_criteria: Vec::new(),
            prefix_allowed_tokens: None,
            state: GenerationState::Initializing,
            decode: None,
        }
    }

    /// Use these defaults instead of the model's (copied, never mutated)
    pub fn with_config(mut self, config: &GenerationConfig) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// Per-call overrides applied on top of the defaults
    pub fn with_overrides(mut self, overrides: GenerationOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Extra end-of-sequence id on top of the configured ones
    pub fn with_additional_eos_token_id(mut self, token_id: u32) -> Self {
        self.additional_eos_token_id = Some(token_id);
        self
    }

    /// Processor run after the config-derived ones
    pub fn with_logits_processor(mut self, processor: Box<dyn LogitsProcessor>) -> Self {
        self.extra_processors.push(processor);
        self
    }

    /// Criteria checked alongside the max-length limit
    pub fn with_stopping_criteria(mut self, criteria: Box<dyn StoppingCriteria>) -> Self {
        self.extra_criteria.push(criteria);
        self
    }

    /// Restrict each step to the tokens `allowed` returns for the sequence so far
    pub fn with_prefix_allowed_tokens(mut self, allowed: PrefixAllowedTokensFn) -> Self {
        self.prefix_allowed_tokens = Some(allowed);
        self
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Settings in effect, once initialized
    pub fn resolved(&self) -> Option<&ResolvedGeneration> {
        self.decode.as_ref().map(|decode| &decode.resolved)
    }

    /// Tokens generated so far (prompt excluded)
    pub fn generated_tokens(&self) -> &[u32] {
        match &self.decode {
            Some(decode) => &decode.input_ids[decode.input_len..],
            None => &[],
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let input_ids = self
            .tokenizer
            .encode(&self.prompt)
            .context("Failed to tokenize prompt")?;
        if input_ids.is_empty() {
            anyhow::bail!("Prompt encoded to zero tokens");
        }
        let input_len = input_ids.len();

        let defaults = match &self.config {
            Some(config) => config,
            None => self.model.generation_config(),
        };
        let resolved = defaults.resolve(&self.overrides, self.additional_eos_token_id, input_len)?;
        let config = &resolved.config;

        let mut processors = LogitsProcessorList::new();
        if config.repetition_penalty != 1.0 {
            processors.push(Box::new(RepetitionPenaltyLogitsProcessor::new(
                config.repetition_penalty,
            )));
        }
        processors.extend(self.extra_processors.drain(..));
        if let Some(allowed) = self.prefix_allowed_tokens.take() {
            processors.push(Box::new(PrefixConstrainedLogitsProcessor::new(allowed)));
        }

        let mut warpers = LogitsProcessorList::new();
        if config.do_sample {
            if let Some(temperature) = config.temperature {
                if temperature != 1.0 {
                    warpers.push(Box::new(TemperatureLogitsWarper::new(temperature)?));
                }
            }
            if let Some(top_k) = config.top_k.filter(|&k| k > 0) {
                warpers.push(Box::new(TopKLogitsWarper::new(top_k)));
            }
            if let Some(top_p) = config.top_p.filter(|&p| p < 1.0) {
                warpers.push(Box::new(TopPLogitsWarper::new(top_p)?));
            }
        }

        let mut criteria = StoppingCriteriaList::new();
        criteria.push(Box::new(MaxLengthCriteria::new(resolved.max_length)));
        criteria.extend(self.extra_criteria.drain(..));

        tracing::debug!(
            "Generation initialized: input_len={}, max_length={}, do_sample={}, eos={:?}, processors={:?}, warpers={:?}",
            input_len,
            resolved.max_length,
            config.do_sample,
            resolved.eos_token_ids,
            processors.names(),
            warpers.names()
        );

        let sampler = TokenSampler::new(config.seed);
        self.model.reset();

        self.decode = Some(DecodeState {
            input_ids,
            input_len,
            cached_len: 0,
            resolved,
            processors,
            warpers,
            criteria,
            sampler,
            unfinished: vec![true],
        });
        Ok(())
    }

    fn step(&mut self) -> Result<String> {
        let decode = self
            .decode
            .as_mut()
            .context("Generation stepped before initialization")?;

        let mut scores = self
            .model
            .forward(&decode.input_ids[decode.cached_len..], decode.cached_len)
            .context("Forward pass failed")?;
        decode.cached_len = decode.input_ids.len();
        if scores.is_empty() {
            anyhow::bail!("Model returned an empty score vector");
        }

        decode.processors.apply(&decode.input_ids, &mut scores)?;
        decode.warpers.apply(&decode.input_ids, &mut scores)?;

        let probs = softmax(&scores)?;
        let next_token = if decode.resolved.config.do_sample {
            decode.sampler.sample(&probs)?
        } else {
            argmax(&probs)?
        };

        decode.input_ids.push(next_token);
        update_unfinished(&mut decode.unfinished, &[next_token], &decode.resolved.eos_token_ids);

        let mut generated = &decode.input_ids[decode.input_len..];
        if let Some((last, rest)) = generated.split_last() {
            if decode.resolved.eos_token_ids.contains(last) {
                generated = rest;
            }
        }
        let text = self
            .tokenizer
            .decode(generated)
            .context("Failed to decode generated tokens")?;

        let all_finished = decode.unfinished.iter().all(|unfinished| !unfinished);
        if all_finished || decode.criteria.is_done(&decode.input_ids, &scores) {
            tracing::debug!(
                "Generation finished after {} new tokens (eos: {})",
                decode.input_ids.len() - decode.input_len,
                all_finished
            );
            self.state = GenerationState::Finished;
        }

        Ok(text)
    }
}

impl<M> Iterator for InteractiveGeneration<M>
where
    M: DerefMut,
    M::Target: CausalLm,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            GenerationState::Finished => return None,
            GenerationState::Initializing => {
                if let Err(e) = self.initialize() {
                    self.state = GenerationState::Finished;
                    return Some(Err(e));
                }
                self.state = GenerationState::Decoding;
            }
            GenerationState::Decoding => {}
        }

        match self.step() {
            Ok(text) => Some(Ok(text)),
            Err(e) => {
                self.state = GenerationState::Finished;
                Some(Err(e))
            }
        }
    }
}
