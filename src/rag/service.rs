//! Chat service
//!
//! Blocking and streaming entry points over one shared chain. The chain is
//! built on first use, at most once, even when several threads race for it.

use anyhow::Result;
use once_cell::sync::OnceCell;

use super::chain::{ChainEvent, ChainStream, ConversationalChain};
use super::query::ChatTurn;

type ChainFactory = Box<dyn Fn() -> Result<ConversationalChain> + Send + Sync>;

/// Owner of the shared [`ConversationalChain`]
pub struct ChatService {
    chain: OnceCell<ConversationalChain>,
    factory: Option<ChainFactory>,
}

impl ChatService {
    /// Service that builds its chain with `factory` on first use
    ///
    /// A failed construction is returned to that caller; the next call tries
    /// again.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<ConversationalChain> + Send + Sync + 'static,
    {
        Self {
            chain: OnceCell::new(),
            factory: Some(Box::new(factory)),
        }
    }

    /// Service over an already constructed chain
    pub fn with_chain(chain: ConversationalChain) -> Self {
        Self {
            chain: OnceCell::with_value(chain),
            factory: None,
        }
    }

    /// The shared chain, constructing it if needed
    pub fn chain(&self) -> Result<&ConversationalChain> {
        self.chain.get_or_try_init(|| {
            let factory = self
                .factory
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("No chain factory configured"))?;
            tracing::info!("Constructing conversational chain");
            factory()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.get().is_some()
    }

    /// Full answer to `prompt`
    pub fn answer_blocking(&self, prompt: &str, history: &[ChatTurn]) -> Result<String> {
        let output = self.chain()?.answer(prompt, history)?;
        Ok(output.answer)
    }

    /// Answer to `prompt` as it is generated
    ///
    /// Each item is the answer so far; the last item is the full answer.
    pub fn answer_streaming(&self, prompt: &str, history: &[ChatTurn]) -> Result<AnswerStream<'_>> {
        let events = self.chain()?.stream(prompt, history)?;
        Ok(AnswerStream {
            events,
            last: None,
        })
    }
}

/// Answer text extracted from a [`ChainStream`]
///
/// The closing event repeats the last partial answer, so it is only yielded
/// when it differs.
pub struct AnswerStream<'a> {
    events: ChainStream<'a>,
    last: Option<String>,
}

impl Iterator for AnswerStream<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let answer = match self.events.next()? {
                Ok(ChainEvent::Partial { answer }) => answer,
                Ok(ChainEvent::Finished(output)) => {
                    if self.last.as_deref() == Some(output.answer.as_str()) {
                        continue;
                    }
                    output.answer
                }
                Err(e) => return Some(Err(e)),
            };
            self.last = Some(answer.clone());
            return Some(Ok(answer));
        }
    }
}
