//! Conversational retrieval chain
//!
//! One turn runs: condense the question against the history (skipped when
//! the history is empty), fuse retrieval results, stuff them into the answer
//! prompt, generate, then record the exchange in memory.
//!
//! The history is the caller's unless [`ChainConfig::use_memory`] is set, in
//! which case the chain condenses against the exchanges it recorded itself.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::generation::{GenerationOverrides, Generator};
use crate::retrieval::{Candidate, RetrieverFusion};

use super::context::{ContextBuilder, PromptTemplates};
use super::memory::ConversationMemory;
use super::query::{ChainOutput, ChatTurn, Source};

/// Chain behaviour settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Log intermediate prompts and passages at info level
    pub verbose: bool,
    /// Character limit for the stuffed context block
    pub max_context_chars: Option<usize>,
    /// Overrides applied to every generation call of the chain
    pub generation: GenerationOverrides,
    /// Condense against recorded exchanges instead of the caller's history
    pub use_memory: bool,
}

/// Event produced while streaming a chain turn
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// Answer generated so far
    Partial { answer: String },
    /// The turn completed
    Finished(ChainOutput),
}

impl ChainEvent {
    pub fn answer(&self) -> &str {
        match self {
            ChainEvent::Partial { answer } => answer,
            ChainEvent::Finished(output) => &output.answer,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ChainEvent::Finished(_))
    }
}

/// Question condensation, retrieval and answer generation over one generator
pub struct ConversationalChain {
    fusion: RetrieverFusion,
    generator: Arc<dyn Generator>,
    context: ContextBuilder,
    memory: Mutex<ConversationMemory>,
    config: ChainConfig,
}

impl ConversationalChain {
    pub fn new(fusion: RetrieverFusion, generator: Arc<dyn Generator>) -> Self {
        Self {
            fusion,
            generator,
            context: ContextBuilder::new(),
            memory: Mutex::new(ConversationMemory::new()),
            config: ChainConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the condense and answer templates
    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.context = ContextBuilder::with_templates(templates);
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn fusion(&self) -> &RetrieverFusion {
        &self.fusion
    }

    /// Copy of the exchanges recorded so far
    pub fn memory_snapshot(&self) -> Result<ConversationMemory> {
        let memory = self
            .memory
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory lock poisoned: {}", e))?;
        Ok(memory.clone())
    }

    /// Answer a question in one blocking call
    pub fn answer(&self, question: &str, history: &[ChatTurn]) -> Result<ChainOutput> {
        let (condensed, candidates) = self.retrieve(question, history)?;
        let prompt = self.answer_prompt(&condensed, &candidates)?;

        let answer = self.generator.generate(&prompt, &self.config.generation)?;
        self.log_step("Answer", &answer);

        self.remember(question, &answer)?;
        Ok(ChainOutput {
            answer,
            question: condensed,
            sources: candidates.iter().map(Source::from_candidate).collect(),
        })
    }

    /// Answer a question as a stream of [`ChainEvent`]s
    ///
    /// Condensation and retrieval run before this returns; the answer is
    /// generated as the stream is pulled. The exchange is recorded in memory
    /// once the stream finishes.
    pub fn stream(&self, question: &str, history: &[ChatTurn]) -> Result<ChainStream<'_>> {
        let (condensed, candidates) = self.retrieve(question, history)?;
        let prompt = self.answer_prompt(&condensed, &candidates)?;

        let inner = self.generator.generate_stream(&prompt, &self.config.generation)?;
        Ok(ChainStream {
            chain: self,
            inner: Some(inner),
            question: question.to_string(),
            condensed,
            sources: candidates.iter().map(Source::from_candidate).collect(),
            answer: String::new(),
        })
    }

    /// Standalone question for retrieval
    fn condense(&self, question: &str, history: &[ChatTurn]) -> Result<String> {
        let recorded = if self.config.use_memory {
            Some(self.memory_snapshot()?.chat_turns())
        } else {
            None
        };
        let history = recorded.as_deref().unwrap_or(history);
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = self.context.format_condense_prompt(question, history)?;
        self.log_step("Condense prompt", &prompt);

        let condensed = self.generator.generate(&prompt, &self.config.generation)?;
        let condensed = condensed.trim();
        if condensed.is_empty() {
            tracing::warn!("Question condensation produced no text, using the question as asked");
            return Ok(question.to_string());
        }
        Ok(condensed.to_string())
    }

    fn retrieve(&self, question: &str, history: &[ChatTurn]) -> Result<(String, Vec<Candidate>)> {
        let condensed = self.condense(question, history)?;
        self.log_step("Standalone question", &condensed);

        let candidates = self.fusion.fuse(&condensed)?;
        for candidate in &candidates {
            self.log_step(
                &format!("Passage {} ({:.4})", candidate.rank, candidate.score()),
                &candidate.chunk.content,
            );
        }
        Ok((condensed, candidates))
    }

    fn answer_prompt(&self, question: &str, candidates: &[Candidate]) -> Result<String> {
        let context = self.context.build(candidates, self.config.max_context_chars);
        let prompt = self.context.format_answer_prompt(question, &context)?;
        self.log_step("Answer prompt", &prompt);
        Ok(prompt)
    }

    fn remember(&self, question: &str, answer: &str) -> Result<()> {
        let mut memory = self
            .memory
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory lock poisoned: {}", e))?;
        memory.push_turn(question, answer);
        Ok(())
    }

    fn log_step(&self, step: &str, value: &str) {
        if self.config.verbose {
            tracing::info!("{}:\n{}", step, value);
        } else {
            tracing::debug!("{}:\n{}", step, value);
        }
    }
}

/// Streaming chain turn; see [`ConversationalChain::stream`]
pub struct ChainStream<'a> {
    chain: &'a ConversationalChain,
    inner: Option<Box<dyn Iterator<Item = Result<String>> + 'a>>,
    question: String,
    condensed: String,
    sources: Vec<Source>,
    answer: String,
}

impl Iterator for ChainStream<'_> {
    type Item = Result<ChainEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;

        match inner.next() {
            Some(Ok(partial)) => {
                self.answer = partial.clone();
                Some(Ok(ChainEvent::Partial { answer: partial }))
            }
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            None => {
                // Release the generator before touching memory
                self.inner = None;
                self.chain.log_step("Answer", &self.answer);
                if let Err(e) = self.chain.remember(&self.question, &self.answer) {
                    return Some(Err(e));
                }
                Some(Ok(ChainEvent::Finished(ChainOutput {
                    answer: std::mem::take(&mut self.answer),
                    question: std::mem::take(&mut self.condensed),
                    sources: std::mem::take(&mut self.sources),
                })))
            }
        }
    }
}
