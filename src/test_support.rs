//! Scripted doubles shared by unit tests

use crate::data::Chunk;
use crate::generation::{CausalLm, GenerationConfig, GenerationOverrides, Generator, Tokenizer};
use crate::retrieval::{Reranker, Retriever, SearchResult};
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// End-of-sequence id used by the scripted model
pub const EOS: u32 = 0;

const SCRIPT_VOCAB: usize = 128;

/// One token per character, ids are code points
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(|c| c as u32).collect())
    }

    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        token_ids
            .iter()
            .map(|&id| char::from_u32(id).ok_or_else(|| anyhow::anyhow!("invalid token id {}", id)))
            .collect()
    }
}

/// Causal LM that follows a fixed script regardless of its input
///
/// The n-th forward call since the last reset peaks at the n-th script
/// token. Past the end of the script it peaks at [`EOS`].
pub struct ScriptedLm {
    script: Vec<u32>,
    vocab: usize,
    uniform: bool,
    fail_at: Option<usize>,
    position: usize,
    calls: Vec<(usize, usize)>,
    resets: usize,
    generation_config: GenerationConfig,
}

impl ScriptedLm {
    /// Spell `text` then emit EOS
    pub fn spelling(text: &str) -> Self {
        let mut script: Vec<u32> = text.chars().map(|c| c as u32).collect();
        script.push(EOS);
        Self::with_script(script, SCRIPT_VOCAB, false)
    }

    /// Equal scores for every token
    pub fn uniform(vocab: usize) -> Self {
        Self::with_script(Vec::new(), vocab, true)
    }

    fn with_script(script: Vec<u32>, vocab: usize, uniform: bool) -> Self {
        Self {
            script,
            vocab,
            uniform,
            fail_at: None,
            position: 0,
            calls: Vec::new(),
            resets: 0,
            generation_config: GenerationConfig {
                eos_token_id: vec![EOS],
                ..Default::default()
            },
        }
    }

    /// Never emit EOS and configure no eos ids
    pub fn without_eos(mut self) -> Self {
        if self.script.last() == Some(&EOS) {
            self.script.pop();
        }
        self.generation_config.eos_token_id.clear();
        self
    }

    /// Fail the n-th forward call (0-based)
    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// `(input length, past length)` of every forward call
    pub fn calls(&self) -> &[(usize, usize)] {
        &self.calls
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl CausalLm for ScriptedLm {
    fn forward(&mut self, input_ids: &[u32], past_len: usize) -> Result<Vec<f32>> {
        let call = self.calls.len();
        self.calls.push((input_ids.len(), past_len));
        if self.fail_at == Some(call) {
            anyhow::bail!("forward pass {} failed", call);
        }

        let mut scores = vec![0.0; self.vocab];
        if !self.uniform {
            let peak = match self.script.get(self.position) {
                Some(&token) => Some(token),
                None if self.generation_config.eos_token_id.is_empty() => None,
                None => Some(EOS),
            };
            if let Some(token) = peak {
                scores[token as usize] = 10.0;
            }
        }
        self.position += 1;
        Ok(scores)
    }

    fn reset(&mut self) {
        self.position = 0;
        self.resets += 1;
    }

    fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }
}

/// Returns canned answers in order, repeating the last one
///
/// Streams word by word; each item is the answer so far.
pub struct ScriptedGenerator {
    responses: Vec<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(String::from).collect(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate_stream(
        &self,
        prompt: &str,
        _overrides: &GenerationOverrides,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + '_>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let response = self
            .responses
            .get(call)
            .or(self.responses.last())
            .cloned()
            .unwrap_or_default();

        let mut ends: Vec<usize> = response
            .char_indices()
            .filter(|&(i, c)| {
                !c.is_whitespace()
                    && response[i + c.len_utf8()..]
                        .chars()
                        .next()
                        .map_or(true, char::is_whitespace)
            })
            .map(|(i, c)| i + c.len_utf8())
            .collect();
        if ends.last() != Some(&response.len()) {
            ends.push(response.len());
        }

        let partials: Vec<Result<String>> =
            ends.into_iter().map(|end| Ok(response[..end].to_string())).collect();
        Ok(Box::new(partials.into_iter()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Returns its chunks in order, truncated to `top_k`
pub struct StaticRetriever {
    name: String,
    chunks: Vec<Chunk>,
}

impl StaticRetriever {
    pub fn new(name: &str, chunks: Vec<Chunk>) -> Self {
        Self {
            name: name.to_string(),
            chunks,
        }
    }
}

impl Retriever for StaticRetriever {
    fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        Ok(self
            .chunks
            .iter()
            .take(top_k)
            .enumerate()
            .map(|(i, chunk)| SearchResult::new(chunk.clone(), 1.0 / (i as f32 + 1.0), i + 1))
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Always fails with the given message
pub struct FailingRetriever {
    name: String,
    message: String,
}

impl FailingRetriever {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl Retriever for FailingRetriever {
    fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchResult>> {
        Err(anyhow::anyhow!("{}", self.message))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Scores a passage by how often the query terms occur in it
pub struct KeywordReranker;

impl Reranker for KeywordReranker {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        let passage = passage.to_lowercase();
        let score = query
            .split_whitespace()
            .map(|term| term.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|term| !term.is_empty())
            .map(|term| passage.matches(term.as_str()).count())
            .sum::<usize>();
        Ok(score as f32)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
