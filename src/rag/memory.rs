//! Conversation memory
//!
//! Records every completed exchange of a chain. The buffer only grows.

use serde::{Deserialize, Serialize};

use super::query::ChatTurn;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Buffer of exchanged messages, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one question and its answer
    pub fn push_turn(&mut self, question: &str, answer: &str) {
        self.messages.push(Message {
            role: Role::Human,
            content: question.to_string(),
        });
        self.messages.push(Message {
            role: Role::Ai,
            content: answer.to_string(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Recorded exchanges as question and answer pairs, oldest first
    pub fn chat_turns(&self) -> Vec<ChatTurn> {
        self.messages
            .chunks_exact(2)
            .map(|pair| ChatTurn::new(pair[0].content.as_str(), pair[1].content.as_str()))
            .collect()
    }

    /// Number of completed exchanges
    pub fn turns(&self) -> usize {
        self.messages.len() / 2
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_turn() {
        let mut memory = ConversationMemory::new();
        assert!(memory.is_empty());

        memory.push_turn("What is mapo tofu?", "A spicy Sichuan dish.");
        memory.push_turn("Is it vegetarian?", "Not usually.");

        assert_eq!(memory.len(), 4);
        assert_eq!(memory.turns(), 2);
        assert_eq!(memory.messages()[0].role, Role::Human);
        assert_eq!(memory.messages()[3].role, Role::Ai);
        assert_eq!(memory.messages()[3].content, "Not usually.");

        let turns = memory.chat_turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1], ChatTurn::new("Is it vegetarian?", "Not usually."));
    }
}
