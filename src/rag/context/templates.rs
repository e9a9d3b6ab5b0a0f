//! Prompt templates for the conversational chain
//!
//! Two templates drive the chain: `condense_question` rewrites a follow-up
//! into a standalone question, `qa` answers it from retrieved context.
//! Placeholders are written `{name}`.

use std::collections::HashMap;

/// Template answering a question from retrieved context
pub const QA_TEMPLATE: &str = "qa";

/// Template rewriting a follow-up question using the conversation
pub const CONDENSE_TEMPLATE: &str = "condense_question";

/// Prompt templates keyed by name
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let mut templates = HashMap::new();

        templates.insert(
            QA_TEMPLATE.to_string(),
            concat!(
                "Use the following context to answer the user's question.\n",
                "Context:\n",
                "···\n",
                "{context}\n",
                "···\n",
                "Question: {question}\n",
                "If the given context holds no useful reference information, ",
                "answer from your own knowledge.\n",
                "Helpful answer:"
            )
            .to_string(),
        );

        templates.insert(
            CONDENSE_TEMPLATE.to_string(),
            concat!(
                "Below is a conversation and a follow-up question. Combine the conversation ",
                "and the follow-up question into one new standalone question.\n",
                "Conversation:\n",
                "···\n",
                "{chat_history}\n",
                "···\n",
                "Follow-up question: {question}\n",
                "New question:"
            )
            .to_string(),
        );

        Self { templates }
    }
}

impl PromptTemplates {
    /// Create a new empty template collection
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Get a template by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(|s| s.as_str())
    }

    /// Register a template, replacing any with the same name
    pub fn register(&mut self, name: &str, template: &str) {
        self.templates.insert(name.to_string(), template.to_string());
    }

    /// Check if a template exists
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// List all available template names
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }
}

/// Substitute `{name}` placeholders in one pass
///
/// Substituted text is never rescanned, so a question containing
/// `{context}` stays literal. Unknown placeholders are kept as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });

        match replaced {
            Some((value, end)) => {
                output.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let templates = PromptTemplates::default();

        assert!(templates.contains(QA_TEMPLATE));
        assert!(templates.contains(CONDENSE_TEMPLATE));

        let qa = templates.get(QA_TEMPLATE).unwrap();
        assert!(qa.contains("{context}"));
        assert!(qa.contains("{question}"));
        assert!(templates.get(CONDENSE_TEMPLATE).unwrap().contains("{chat_history}"));
    }

    #[test]
    fn test_custom_template() {
        let mut templates = PromptTemplates::default();

        templates.register(QA_TEMPLATE, "Q: {question}");
        assert_eq!(templates.get(QA_TEMPLATE), Some("Q: {question}"));
        assert!(templates.get("missing").is_none());
    }

    #[test]
    fn test_render() {
        let rendered = render(
            "Context: {context}\nQ: {question}",
            &[("context", "tofu"), ("question", "how?")],
        );
        assert_eq!(rendered, "Context: tofu\nQ: how?");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let rendered = render(
            "{question} / {context}",
            &[("question", "what is {context}?"), ("context", "C")],
        );
        assert_eq!(rendered, "what is {context}? / C");
    }

    #[test]
    fn test_render_keeps_unknown_and_unbalanced() {
        assert_eq!(render("{a} {b", &[("a", "1")]), "1 {b");
        assert_eq!(render("json {\"k\": 1}", &[]), "json {\"k\": 1}");
    }
}
