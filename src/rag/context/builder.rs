//! Context builder for chain prompts
//!
//! Joins reranked passages into one context block and renders the condense
//! and answer templates.

use anyhow::{Context, Result};

use crate::rag::query::ChatTurn;
use crate::retrieval::Candidate;

use super::templates::{render, PromptTemplates, CONDENSE_TEMPLATE, QA_TEMPLATE};

/// Separator between passages in the context block
const PASSAGE_SEPARATOR: &str = "\n\n";

/// Builds prompts from retrieved passages and conversation history
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    templates: PromptTemplates,
}

impl ContextBuilder {
    /// Create a new context builder with default templates
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context builder with custom templates
    pub fn with_templates(templates: PromptTemplates) -> Self {
        Self { templates }
    }

    /// Build the context block from reranked candidates
    ///
    /// Passages are kept in order and separated by a blank line. With
    /// `max_chars` set, the block is cut at that many characters and
    /// passages past the limit are dropped.
    pub fn build(&self, candidates: &[Candidate], max_chars: Option<usize>) -> String {
        let mut context = String::new();
        let mut total_chars = 0;

        for candidate in candidates {
            let separator = if context.is_empty() { "" } else { PASSAGE_SEPARATOR };
            let content = candidate.chunk.content.trim();
            let needed = separator.chars().count() + content.chars().count();

            if let Some(max_chars) = max_chars {
                if total_chars + needed > max_chars {
                    let remaining = max_chars.saturating_sub(total_chars);
                    let piece: String = separator.chars().chain(content.chars()).take(remaining).collect();
                    context.push_str(piece.trim_end());
                    break;
                }
            }

            context.push_str(separator);
            context.push_str(content);
            total_chars += needed;
        }

        context
    }

    /// Render the answer-synthesis prompt
    pub fn format_answer_prompt(&self, question: &str, context: &str) -> Result<String> {
        let template = self.template(QA_TEMPLATE)?;
        Ok(render(template, &[("context", context), ("question", question)]))
    }

    /// Render the question-condensing prompt
    pub fn format_condense_prompt(&self, question: &str, history: &[ChatTurn]) -> Result<String> {
        let template = self.template(CONDENSE_TEMPLATE)?;
        let chat_history = format_history(history);
        Ok(render(
            template,
            &[("chat_history", chat_history.as_str()), ("question", question)],
        ))
    }

    fn template(&self, name: &str) -> Result<&str> {
        self.templates
            .get(name)
            .with_context(|| format!("Prompt template '{}' is not registered", name))
    }

    /// Get access to templates for customization
    pub fn templates_mut(&mut self) -> &mut PromptTemplates {
        &mut self.templates
    }
}

/// Render prior turns as `Human:` / `Assistant:` lines
pub fn format_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Chunk;

    fn make_candidate(id: &str, content: &str) -> Candidate {
        Candidate {
            chunk: Chunk::new(id, "doc", content),
            hits: Vec::new(),
            fused_score: 0.0,
            rerank_score: None,
            rank: 1,
        }
    }

    #[test]
    fn test_build_context() {
        let builder = ContextBuilder::new();
        let candidates = vec![
            make_candidate("c1", "First passage "),
            make_candidate("c2", "Second passage"),
        ];

        assert_eq!(builder.build(&candidates, None), "First passage\n\nSecond passage");
        assert_eq!(builder.build(&[], None), "");
    }

    #[test]
    fn test_build_context_truncation() {
        let builder = ContextBuilder::new();
        let candidates = vec![
            make_candidate("c1", &"甲".repeat(10)),
            make_candidate("c2", &"乙".repeat(10)),
            make_candidate("c3", "never reached"),
        ];

        let context = builder.build(&candidates, Some(15));
        assert_eq!(context.chars().count(), 15);
        assert!(context.starts_with(&"甲".repeat(10)));
        assert!(!context.contains("never"));
    }

    #[test]
    fn test_format_answer_prompt() {
        let builder = ContextBuilder::new();
        let prompt = builder
            .format_answer_prompt("What is X?", "Context about X")
            .unwrap();

        assert!(prompt.contains("Question: What is X?"));
        assert!(prompt.contains("Context about X"));
        assert!(prompt.ends_with("Helpful answer:"));
    }

    #[test]
    fn test_format_condense_prompt() {
        let builder = ContextBuilder::new();
        let history = vec![
            ChatTurn::new("How do I braise pork?", "Slowly, with soy sauce."),
            ChatTurn::new("How long?", "About an hour."),
        ];

        let prompt = builder.format_condense_prompt("And the sugar?", &history).unwrap();
        assert!(prompt.contains(
            "Human: How do I braise pork?\nAssistant: Slowly, with soy sauce.\nHuman: How long?"
        ));
        assert!(prompt.contains("Follow-up question: And the sugar?"));
    }

    #[test]
    fn test_custom_templates() {
        let mut builder = ContextBuilder::new();
        builder.templates_mut().register(QA_TEMPLATE, "{context}|{question}");

        assert_eq!(builder.format_answer_prompt("q", "c").unwrap(), "c|q");
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let builder = ContextBuilder::with_templates(PromptTemplates::new());

        let err = builder.format_answer_prompt("q", "c").unwrap_err();
        assert!(err.to_string().contains("'qa'"));
        assert!(builder.format_condense_prompt("q", &[]).is_err());
    }
}
