//! Output guardrail: catches unfilled template tokens such as `[Your Name]`
//! before a report leaves the process.
//!
//! Bracketed tokens are scanned line by line outside fenced code. Markdown
//! syntax that legitimately uses brackets is ignored. Tokens made of
//! template vocabulary trip immediately; anything else bracketed is
//! ambiguous and goes to the model judge when one is configured.

use super::{GuardrailInput, GuardrailVerdict, normalize_text};
use crate::brain::{Brain, StructuredOutput};
use crate::error::DelveError;
use crate::research::steps::{ResearchTool, ToolKind};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::LazyLock;
use tracing::{debug, warn};

static BRACKET_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]\n]{1,80})\]").expect("bracket token pattern is valid")
});

static PLACEHOLDER_VOCABULARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(your|insert|enter|name|date|company|recipient|placeholder|tbd|todo|author|address|email|phone|organi[sz]ation|client|signature|title|position|xx+)\b",
    )
    .expect("placeholder vocabulary pattern is valid")
});

/// Citation markers like `[3]`, `[1, 4]`, `[2-5]`, `[^note]`.
static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\^\S+|\d+(\s*[,\-–]\s*\d+)*)$").expect("citation pattern is valid")
});

/// Editorial insertions that are ordinary prose.
const EDITORIAL: &[&str] = &["sic", "...", "…", "citation needed", "emphasis added", "sic!"];

const JUDGE_INSTRUCTIONS: &str = "You review a research report before it is emailed. Below are \
bracketed fragments found in the report, each with its line. Decide whether any of them is an \
unfilled template placeholder (a slot the author was meant to replace, like a name, date, \
figure, or link) rather than legitimate content.";

/// A bracketed fragment found in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketToken {
    /// The token including brackets, e.g. `[Your Name]`.
    pub token: String,
    /// The line it was found on.
    pub line: String,
    /// Made of template vocabulary; no judgment needed.
    pub definite: bool,
}

/// A reference definition line, `[id]: url`, with a link-like destination.
static REFERENCE_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}\[([^\[\]\n]{1,80})\]:\s+<?(https?://|mailto:|www\.|/|\./|\.\./|#)\S*")
        .expect("reference definition pattern is valid")
});

/// Find every bracketed fragment that could be a placeholder.
pub fn scan(text: &str) -> Vec<BracketToken> {
    let definitions = reference_ids(text);
    let mut found = Vec::new();

    for line in prose_lines(text) {
        for caps in BRACKET_TOKEN.captures_iter(line) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let normalized = normalize_text(inner.as_str());
            if normalized.is_empty() || EDITORIAL.contains(&normalized.as_str()) {
                continue;
            }
            if is_markdown_syntax(line, whole.start(), whole.end(), inner.as_str(), &definitions)
            {
                continue;
            }
            found.push(BracketToken {
                token: whole.as_str().to_string(),
                line: line.trim().chars().take(200).collect(),
                definite: PLACEHOLDER_VOCABULARY.is_match(&normalized),
            });
        }
    }
    found
}

/// Lines outside fenced code blocks.
fn prose_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    text.lines().filter(move |line| {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}

/// Labels matched case-insensitively with whitespace collapsed.
fn reference_key(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ids of every `[id]: url` definition in the document.
fn reference_ids(text: &str) -> Vec<String> {
    prose_lines(text)
        .filter_map(|line| REFERENCE_DEFINITION.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| reference_key(m.as_str())))
        .collect()
}

fn is_markdown_syntax(
    line: &str,
    start: usize,
    end: usize,
    inner: &str,
    definitions: &[String],
) -> bool {
    let rest = &line[end..];
    let is_defined = |label: &str| definitions.contains(&reference_key(label));

    // Task list checkboxes and citations.
    if matches!(inner, " " | "x" | "X") || CITATION.is_match(inner.trim()) {
        return true;
    }
    // Inline links and images `[text](url)`.
    if rest.starts_with('(') {
        return true;
    }
    // The definition line itself.
    if rest.starts_with(':')
        && line[..start].trim().is_empty()
        && REFERENCE_DEFINITION.is_match(line)
    {
        return true;
    }
    // `[text][id]` and `[id][]` count only when `id` is defined.
    if let Some(next) = rest.strip_prefix('[') {
        let label = next.split(']').next().unwrap_or("");
        let id = if label.is_empty() { inner } else { label };
        return is_defined(id);
    }
    // Second half of a reference link, or a shortcut reference `[id]`.
    is_defined(inner)
}

#[derive(Debug, Deserialize)]
struct PlaceholderJudgment {
    contains_placeholders: bool,
    reasoning: String,
}

impl StructuredOutput for PlaceholderJudgment {
    const SCHEMA_NAME: &'static str = "placeholder_judgment";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "contains_placeholders": {"type": "boolean"},
                "reasoning": {"type": "string"}
            },
            "required": ["contains_placeholders", "reasoning"]
        })
    }
}

pub struct PlaceholderGuardrail {
    judge: Option<Brain>,
    fail_closed: bool,
}

impl PlaceholderGuardrail {
    pub fn new() -> Self {
        Self {
            judge: None,
            fail_closed: true,
        }
    }

    /// Let a model decide on fragments outside the template vocabulary.
    pub fn with_judge(mut self, brain: Brain) -> Self {
        self.judge = Some(brain.with_temperature(0.0).with_max_tokens(300));
        self
    }

    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    pub async fn check(&self, input: &GuardrailInput) -> GuardrailVerdict {
        let tokens = scan(&input.text);
        if tokens.is_empty() {
            return GuardrailVerdict::pass("No bracketed placeholders found.");
        }

        let definite: Vec<&str> = tokens
            .iter()
            .filter(|t| t.definite)
            .map(|t| t.token.as_str())
            .collect();
        if !definite.is_empty() {
            debug!(trace_id = %input.trace_id, count = definite.len(), "Placeholder tokens found");
            return GuardrailVerdict::trip(format!(
                "Report contains unfilled placeholders: {}",
                definite.join(", ")
            ));
        }

        let listed: Vec<&str> = tokens.iter().map(|t| t.token.as_str()).collect();
        let Some(judge) = &self.judge else {
            return GuardrailVerdict::trip(format!(
                "Report contains bracketed text that may be placeholders: {}",
                listed.join(", ")
            ));
        };

        let mut prompt = String::new();
        for token in &tokens {
            prompt.push_str(&format!("- {}\n  line: {}\n", token.token, token.line));
        }

        match judge
            .invoke::<PlaceholderJudgment>(JUDGE_INSTRUCTIONS, &prompt)
            .await
        {
            Ok(j) if j.contains_placeholders => GuardrailVerdict::trip(j.reasoning),
            Ok(j) => GuardrailVerdict::pass(j.reasoning),
            Err(e) if self.fail_closed => {
                warn!(trace_id = %input.trace_id, error = %e, "Placeholder judge unavailable; blocking");
                GuardrailVerdict::trip(format!(
                    "Could not confirm bracketed text is not a placeholder ({}): {e}",
                    listed.join(", ")
                ))
            }
            Err(e) => {
                warn!(trace_id = %input.trace_id, error = %e, "Placeholder judge unavailable; allowing");
                GuardrailVerdict::pass(format!("Placeholder judge unavailable: {e}"))
            }
        }
    }
}

impl Default for PlaceholderGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResearchTool for PlaceholderGuardrail {
    type Input = GuardrailInput;
    type Output = GuardrailVerdict;

    fn kind(&self) -> ToolKind {
        ToolKind::Guardrail
    }

    fn name(&self) -> &str {
        "placeholder_check"
    }

    async fn invoke(&self, input: GuardrailInput) -> Result<GuardrailVerdict, DelveError> {
        Ok(self.check(&input).await)
    }
}
