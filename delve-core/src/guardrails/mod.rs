//! Guardrails: classifiers that gate steps with external side effects.
//!
//! Every guardrail is a [`ResearchTool`] taking a [`GuardrailInput`] and
//! returning a [`GuardrailVerdict`]. A tripped verdict is an ordinary value
//! the orchestrator branches on; guardrails never modify what they inspect.
//!
//! - `content_safety`: input check on the research query.
//! - `placeholder`: output check for unfilled template tokens in a report.

pub mod content_safety;
pub mod placeholder;

use crate::research::steps::ResearchTool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub use content_safety::ContentSafetyGuardrail;
pub use placeholder::PlaceholderGuardrail;

/// Where in the run a check happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    /// Before any tool runs; a tripwire blocks the whole run.
    Input,
    /// Before an external side effect; a tripwire blocks only that action.
    Output,
}

/// Payload under inspection plus its context.
#[derive(Debug, Clone)]
pub struct GuardrailInput {
    pub text: String,
    pub stage: GuardrailStage,
    pub trace_id: Uuid,
}

impl GuardrailInput {
    pub fn new(text: impl Into<String>, stage: GuardrailStage, trace_id: Uuid) -> Self {
        Self {
            text: text.into(),
            stage,
            trace_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub tripwire_triggered: bool,
    pub reasoning: String,
}

impl GuardrailVerdict {
    pub fn pass(reasoning: impl Into<String>) -> Self {
        Self {
            tripwire_triggered: false,
            reasoning: reasoning.into(),
        }
    }

    pub fn trip(reasoning: impl Into<String>) -> Self {
        Self {
            tripwire_triggered: true,
            reasoning: reasoning.into(),
        }
    }
}

/// A shareable guardrail.
pub type SharedGuardrail =
    Arc<dyn ResearchTool<Input = GuardrailInput, Output = GuardrailVerdict>>;

/// Lowercase, strip combining marks, fold compatibility forms, and collapse
/// whitespace so lookalike spellings match the same patterns.
pub(crate) fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    let mut result = String::with_capacity(folded.len());
    let mut prev_space = false;
    for c in folded.chars() {
        if c.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.extend(c.to_lowercase());
            prev_space = false;
        }
    }
    result.trim().to_string()
}
