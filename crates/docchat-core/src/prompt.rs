//! Domain profiles and prompt assembly.
//!
//! A domain profile is a named system-prompt template. Lookup is a plain
//! map with a fixed default: unknown names fall back to the default profile
//! and never fail.
//!
//! The assembled prompt always has the same section order:
//!
//! ```text
//! ### System         profile template + grounding instructions
//! ### Conversation   Q:/A: lines, oldest first (omitted without history)
//! ### Context        [chunk:<id>] tagged passages in ranked order
//! ### Question       the standalone question
//! ```
//!
//! Citation parsing in [`crate::citation`] relies on the `[chunk:<id>]`
//! marker format produced here.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::citation::marker;
use crate::error::{RagError, Result};
use crate::models::{ConversationTurn, RetrievalResult};

/// Name of the built-in default profile.
pub const DEFAULT_PROFILE: &str = "customer_service";

/// Appended to every profile's system prompt.
pub const GROUNDING_INSTRUCTIONS: &str = "\
Answer using only the information in the Context section. \
If the context is empty or does not contain the answer, say that the information \
is not available in the documents. \
Cite the passages you rely on with their [chunk:<id>] markers.";

/// Placeholder rendered when retrieval returned nothing.
pub const EMPTY_CONTEXT: &str = "(no relevant passages were found)";

/// Named system-prompt templates with a default.
#[derive(Debug, Clone)]
pub struct DomainProfiles {
    templates: BTreeMap<String, String>,
    default: String,
}

impl Default for DomainProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DomainProfiles {
    /// The built-in profiles: `customer_service` (default),
    /// `technical_support` and `faq`.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            "customer_service".to_string(),
            "You are a helpful customer service assistant. \
             Answer questions based on the provided information. \
             Be concise, professional, and empathetic. \
             If you don't know the answer, say so and offer to escalate to a human agent."
                .to_string(),
        );
        templates.insert(
            "technical_support".to_string(),
            "You are a technical support assistant. \
             Provide clear, step-by-step solutions based on the provided documentation. \
             Use technical terminology appropriately. \
             If the solution is not in the documentation, suggest troubleshooting steps \
             and escalation paths."
                .to_string(),
        );
        templates.insert(
            "faq".to_string(),
            "You are an FAQ assistant. \
             Provide brief, direct answers based on the provided FAQ information. \
             If the question is not covered, say so politely and suggest related topics."
                .to_string(),
        );
        Self {
            templates,
            default: DEFAULT_PROFILE.to_string(),
        }
    }

    /// Add a profile or replace an existing one.
    pub fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Choose which profile unknown names fall back to.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] if `name` is not a known profile.
    pub fn with_default(mut self, name: &str) -> Result<Self> {
        if !self.templates.contains_key(name) {
            return Err(RagError::InvalidConfiguration(format!(
                "default profile '{name}' is not defined"
            )));
        }
        self.default = name.to_string();
        Ok(self)
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Resolve `name` to `(profile name, template)`, falling back to the
    /// default for `None` or unknown names.
    pub fn resolve(&self, name: Option<&str>) -> (&str, &str) {
        if let Some(n) = name {
            if let Some((key, template)) = self.templates.get_key_value(n) {
                return (key.as_str(), template.as_str());
            }
            warn!(profile = n, fallback = %self.default, "unknown domain profile");
        }
        let template = self
            .templates
            .get(&self.default)
            .map(String::as_str)
            .unwrap_or_default();
        (self.default.as_str(), template)
    }
}

/// A fully assembled generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptSpec {
    /// Profile that was actually used after fallback.
    pub profile: String,
    pub system: String,
    /// Serialized history; empty when there are no prior turns.
    pub history: String,
    pub context: String,
    pub question: String,
    /// Chunks included in the context, in ranked order.
    pub included_chunk_ids: Vec<String>,
    /// Chunks dropped because the context budget was exhausted.
    pub dropped_chunk_ids: Vec<String>,
}

impl PromptSpec {
    /// Render the prompt text in the fixed section order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        out.push_str("### System\n");
        out.push_str(&self.system);
        if !self.history.is_empty() {
            out.push_str("\n\n### Conversation\n");
            out.push_str(&self.history);
        }
        out.push_str("\n\n### Context\n");
        out.push_str(&self.context);
        out.push_str("\n\n### Question\n");
        out.push_str(&self.question);
        out.push('\n');
        out
    }
}

/// Merges profile, history, retrieved context and question into a
/// [`PromptSpec`] under a context budget.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    profiles: DomainProfiles,
    max_context_chars: usize,
}

impl PromptAssembler {
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] when `max_context_chars` is 0.
    pub fn new(profiles: DomainProfiles, max_context_chars: usize) -> Result<Self> {
        if max_context_chars == 0 {
            return Err(RagError::InvalidConfiguration(
                "max_context_chars must be > 0".to_string(),
            ));
        }
        Ok(Self {
            profiles,
            max_context_chars,
        })
    }

    pub fn profiles(&self) -> &DomainProfiles {
        &self.profiles
    }

    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars
    }

    pub fn assemble(
        &self,
        profile: Option<&str>,
        retrieval: &RetrievalResult,
        question: &str,
        recent_turns: &[ConversationTurn],
    ) -> PromptSpec {
        let (profile_name, template) = self.profiles.resolve(profile);
        let system = format!("{}\n\n{}", template.trim(), GROUNDING_INSTRUCTIONS);

        let mut blocks = Vec::new();
        let mut included = Vec::new();
        let mut dropped = Vec::new();
        let mut used = 0usize;
        for scored in &retrieval.chunks {
            let block = format!("{}\n{}", marker(&scored.chunk.id), scored.chunk.text.trim());
            let cost = block.chars().count();
            // Once one chunk is over budget, it and everything ranked below it go.
            if dropped.is_empty() && used + cost <= self.max_context_chars {
                used += cost;
                blocks.push(block);
                included.push(scored.chunk.id.clone());
            } else {
                dropped.push(scored.chunk.id.clone());
            }
        }

        let context = if blocks.is_empty() {
            EMPTY_CONTEXT.to_string()
        } else {
            blocks.join("\n\n")
        };

        PromptSpec {
            profile: profile_name.to_string(),
            system,
            history: serialize_history(recent_turns),
            context,
            question: question.trim().to_string(),
            included_chunk_ids: included,
            dropped_chunk_ids: dropped,
        }
    }
}

/// Serialize turns as alternating `Q:`/`A:` lines, oldest first.
pub fn serialize_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("Q: {}\nA: {}", t.question.trim(), t.answer.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
