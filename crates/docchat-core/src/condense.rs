//! Follow-up question condensation.
//!
//! Rewrites a context-dependent follow-up ("how much does it cost?") into a
//! standalone query ("how much does X cost?") so that similarity search is
//! not degraded by unresolved references. The rewriting prompt asks for the
//! question alone on one line; anything the model adds after the first
//! non-empty line is discarded.

use tracing::debug;

use crate::error::{RagError, Result};
use crate::generation::{GenerationParams, Generator};
use crate::models::ConversationTurn;
use crate::prompt::serialize_history;

/// Default rewriting template. `{history}` and `{question}` are substituted.
pub const DEFAULT_CONDENSE_TEMPLATE: &str = "\
Given the following conversation and a follow-up question, rephrase the follow-up \
question to be a standalone question that can be understood without the conversation. \
Replace pronouns and other references with the things they refer to. \
Reply with the standalone question only, on a single line, without any commentary.

Chat history:
{history}

Follow-up question: {question}

Standalone question:";

const LABEL: &str = "standalone question:";

#[derive(Debug, Clone)]
pub struct QuestionCondenser {
    template: String,
    params: GenerationParams,
}

impl Default for QuestionCondenser {
    fn default() -> Self {
        Self {
            template: DEFAULT_CONDENSE_TEMPLATE.to_string(),
            params: GenerationParams::rewriting(),
        }
    }
}

impl QuestionCondenser {
    /// Use a custom rewriting template.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] unless the template contains both
    /// `{history}` and `{question}`.
    pub fn with_template(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in ["{history}", "{question}"] {
            if !template.contains(placeholder) {
                return Err(RagError::InvalidConfiguration(format!(
                    "condense template is missing the {placeholder} placeholder"
                )));
            }
        }
        Ok(Self {
            template,
            ..Self::default()
        })
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Render the rewriting prompt.
    pub fn render(&self, question: &str, recent_turns: &[ConversationTurn]) -> String {
        self.template
            .replace("{history}", &serialize_history(recent_turns))
            .replace("{question}", question.trim())
    }

    /// Produce a standalone question.
    ///
    /// With no prior turns the question is returned unchanged and the
    /// generator is not called.
    pub async fn condense(
        &self,
        generator: &dyn Generator,
        question: &str,
        recent_turns: &[ConversationTurn],
    ) -> Result<String> {
        if recent_turns.is_empty() {
            return Ok(question.to_string());
        }
        let prompt = self.render(question, recent_turns);
        let raw = generator.generate(&prompt, &self.params).await?;
        let standalone = extract_standalone(&raw, question);
        debug!(original = question, standalone = %standalone, "condensed question");
        Ok(standalone)
    }
}

/// Keep only the first non-empty line of `raw`, without a leading
/// `Standalone question:` label or wrapping quotes. Falls back to
/// `fallback` when nothing usable remains.
pub fn extract_standalone(raw: &str, fallback: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let line = match line.get(..LABEL.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(LABEL) => line[LABEL.len()..].trim(),
        _ => line,
    };
    let line = line
        .trim_matches(|c| c == '"' || c == '\u{201c}' || c == '\u{201d}')
        .trim();
    if line.is_empty() {
        fallback.to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every prompt with a fixed reply and remembers the prompts.
    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_empty_history_is_identity() {
        let generator = Scripted::new("should not be used");
        let out = QuestionCondenser::default()
            .condense(&generator, "What is the refund policy?", &[])
            .await
            .unwrap();
        assert_eq!(out, "What is the refund policy?");
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolves_reference_from_history() {
        let generator = Scripted::new(
            "How much does X cost?\nI replaced \"it\" with X because of the earlier turn.",
        );
        let history = vec![ConversationTurn::new("What is X?", "X is a widget.", vec![])];
        let out = QuestionCondenser::default()
            .condense(&generator, "How much does it cost?", &history)
            .await
            .unwrap();
        assert_eq!(out, "How much does X cost?");
        assert!(out.contains('X'));
        assert!(!out.split_whitespace().any(|w| w == "it"));

        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Q: What is X?"));
        assert!(prompt.contains("A: X is a widget."));
        assert!(prompt.contains("Follow-up question: How much does it cost?"));
    }

    #[test]
    fn test_extract_standalone() {
        assert_eq!(extract_standalone("\n\n  Where is it?  \nmore", "f"), "Where is it?");
        assert_eq!(
            extract_standalone("Standalone question: \"What is X?\"", "f"),
            "What is X?"
        );
        assert_eq!(extract_standalone("STANDALONE QUESTION:", "fallback"), "fallback");
        assert_eq!(extract_standalone("   ", "fallback"), "fallback");
    }

    #[test]
    fn test_custom_template_requires_placeholders() {
        assert!(QuestionCondenser::with_template("no placeholders").is_err());
        let c = QuestionCondenser::with_template("H={history} Q={question}").unwrap();
        let history = vec![ConversationTurn::new("a", "b", vec![])];
        assert_eq!(c.render(" q ", &history), "H=Q: a\nA: b Q=q");
    }
}
