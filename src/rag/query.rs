//! Chain input and output types

use crate::retrieval::Candidate;
use serde::{Deserialize, Serialize};

/// Maximum characters of passage text kept in a [`Source`]
pub const SNIPPET_CHARS: usize = 200;

/// One completed exchange, as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

impl ChatTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Source document reference in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Chunk identifier
    pub chunk_id: String,
    /// Parent document identifier
    pub document_id: String,
    /// Final score (re-rank score when re-ranked)
    pub score: f32,
    /// Text snippet from the source
    pub snippet: String,
}

impl Source {
    /// Create a new source reference
    pub fn new(chunk_id: &str, document_id: &str, score: f32, snippet: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            score,
            snippet: snippet.to_string(),
        }
    }

    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            chunk_id: candidate.chunk.id.clone(),
            document_id: candidate.chunk.document_id.clone(),
            score: candidate.score(),
            snippet: truncate_snippet(&candidate.chunk.content, SNIPPET_CHARS),
        }
    }
}

/// Result of one chain turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOutput {
    /// Generated answer
    pub answer: String,
    /// Question used for retrieval (condensed when history was given)
    pub question: String,
    /// Passages the answer was conditioned on, best first
    pub sources: Vec<Source>,
}

impl std::fmt::Display for ChainOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Answer: {}", self.answer)?;
        writeln!(f, "Question: {}", self.question)?;
        writeln!(f, "\nSources ({}):", self.sources.len())?;
        for (i, source) in self.sources.iter().enumerate() {
            writeln!(
                f,
                "  [{}] {} (score: {:.4})",
                i + 1,
                source.document_id,
                source.score
            )?;
        }
        Ok(())
    }
}

/// Truncate a text snippet to at most `max_chars` characters, preserving word boundaries
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let truncated = &text[..cut];
    // Find last space to avoid cutting words
    if let Some(last_space) = truncated.rfind(' ') {
        format!("{}...", &truncated[..last_space])
    } else {
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_output_display() {
        let output = ChainOutput {
            answer: "Steam it for ten minutes".to_string(),
            question: "How long do I steam fish?".to_string(),
            sources: vec![Source::new("c1", "fish.md", 0.95, "snippet")],
        };

        let display = format!("{}", output);
        assert!(display.contains("Steam it for ten minutes"));
        assert!(display.contains("fish.md"));
        assert!(display.contains("0.9500"));
    }

    #[test]
    fn test_truncate_snippet() {
        let text = "This is a long piece of text that needs to be truncated";
        let truncated = truncate_snippet(text, 20);

        assert!(truncated.len() <= 23); // 20 + "..."
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_short_text() {
        assert_eq!(truncate_snippet("Short", 20), "Short");
    }

    #[test]
    fn test_truncate_multibyte() {
        let truncated = truncate_snippet("红烧肉需要慢火炖煮一个小时", 4);
        assert_eq!(truncated, "红烧肉需...");
    }
}
