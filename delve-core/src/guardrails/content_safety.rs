//! Input guardrail: refuses research queries in disallowed categories.
//!
//! A pattern pass catches blatant requests without a model call. Everything
//! else goes to a model-backed classifier over the configured categories.

use super::{GuardrailInput, GuardrailVerdict, normalize_text};
use crate::brain::{Brain, StructuredOutput};
use crate::error::DelveError;
use crate::research::steps::{ResearchTool, ToolKind};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Blatant requests, matched against normalized text.
static BLOCKED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b(write|create|build|code|develop|generate)\b.{0,40}\b(ransomware|keylogger|rootkit|botnet|malware|trojan|credential stealer)\b",
            "request to author malware",
        ),
        (
            r"\b(working|weaponi[sz]ed|zero[- ]day)\b.{0,30}\bexploit\b",
            "request for a working exploit",
        ),
        (
            r"\bexploit\b.{0,20}\bcve-\d{4}-\d{4,}\b.{0,40}\b(step by step|payload|shellcode)\b",
            "request for exploit instructions for a specific vulnerability",
        ),
        (
            r"\b(bypass|evade|disable)\b.{0,30}\b(edr|antivirus|anti-virus)\b",
            "request to evade endpoint security",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, label)))
    .collect()
});

#[derive(Debug, Deserialize)]
struct SafetyClassification {
    is_disallowed: bool,
    #[serde(default)]
    category: Option<String>,
    reasoning: String,
}

impl StructuredOutput for SafetyClassification {
    const SCHEMA_NAME: &'static str = "content_safety_verdict";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "is_disallowed": {"type": "boolean"},
                "category": {"type": ["string", "null"], "description": "The matching category, if any"},
                "reasoning": {"type": "string"}
            },
            "required": ["is_disallowed", "reasoning"]
        })
    }
}

pub struct ContentSafetyGuardrail {
    brain: Option<Brain>,
    categories: Vec<String>,
    fail_closed: bool,
}

impl ContentSafetyGuardrail {
    /// Pattern-only guardrail.
    pub fn new(categories: Vec<String>) -> Self {
        Self {
            brain: None,
            categories,
            fail_closed: true,
        }
    }

    /// Add the model-backed classifier.
    pub fn with_classifier(mut self, brain: Brain) -> Self {
        self.brain = Some(brain.with_temperature(0.0).with_max_tokens(300));
        self
    }

    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    fn pattern_check(text: &str) -> Option<&'static str> {
        let normalized = normalize_text(text);
        BLOCKED_PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(&normalized))
            .map(|(_, label)| *label)
    }

    fn instructions(&self) -> String {
        let mut instructions = String::from(
            "You screen research requests before any work starts. Decide whether the request \
             falls into one of the disallowed categories below. General questions about a \
             sensitive subject (history, news, policy, defensive practice) are allowed; flag \
             only requests that ask for the disallowed material itself.\n\nDisallowed categories:",
        );
        for category in &self.categories {
            instructions.push_str("\n- ");
            instructions.push_str(category);
        }
        instructions
    }

    pub async fn check(&self, input: &GuardrailInput) -> GuardrailVerdict {
        if let Some(label) = Self::pattern_check(&input.text) {
            info!(trace_id = %input.trace_id, label, "Input guardrail matched blocked pattern");
            return GuardrailVerdict::trip(format!("The query looks like a {label}."));
        }

        let Some(brain) = &self.brain else {
            return GuardrailVerdict::pass("No blocked pattern matched.");
        };

        match brain
            .invoke::<SafetyClassification>(&self.instructions(), &input.text)
            .await
        {
            Ok(c) if c.is_disallowed => {
                let reasoning = match c.category {
                    Some(category) if !category.is_empty() => {
                        format!("{} (category: {})", c.reasoning, category)
                    }
                    _ => c.reasoning,
                };
                GuardrailVerdict::trip(reasoning)
            }
            Ok(c) => GuardrailVerdict::pass(c.reasoning),
            Err(e) if self.fail_closed => {
                warn!(trace_id = %input.trace_id, error = %e, "Safety classifier unavailable; blocking");
                GuardrailVerdict::trip(format!("Safety classifier unavailable: {e}"))
            }
            Err(e) => {
                warn!(trace_id = %input.trace_id, error = %e, "Safety classifier unavailable; allowing");
                GuardrailVerdict::pass(format!("Safety classifier unavailable: {e}"))
            }
        }
    }
}

#[async_trait]
impl ResearchTool for ContentSafetyGuardrail {
    type Input = GuardrailInput;
    type Output = GuardrailVerdict;

    fn kind(&self) -> ToolKind {
        ToolKind::Guardrail
    }

    fn name(&self) -> &str {
        "content_safety"
    }

    async fn invoke(&self, input: GuardrailInput) -> Result<GuardrailVerdict, DelveError> {
        Ok(self.check(&input).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use crate::error::LlmError;
    use crate::guardrails::GuardrailStage;
    use std::sync::Arc;
    use uuid::Uuid;

    fn input(text: &str) -> GuardrailInput {
        GuardrailInput::new(text, GuardrailStage::Input, Uuid::new_v4())
    }

    fn with_model(provider: Arc<MockLlmProvider>) -> ContentSafetyGuardrail {
        ContentSafetyGuardrail::new(vec!["cyber-security homework".into()])
            .with_classifier(Brain::new(provider, RetryConfig::none()))
    }

    #[tokio::test]
    async fn test_pattern_blocks_without_model_call() {
        let provider = Arc::new(MockLlmProvider::new());
        let guard = with_model(provider.clone());
        let verdict = guard
            .check(&input("Please WRITE me a working ransomware in Rust"))
            .await;
        assert!(verdict.tripwire_triggered);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_benign_query_passes_pattern_only() {
        let guard = ContentSafetyGuardrail::new(vec![]);
        let verdict = guard
            .check(&input("History of the 1988 Morris worm"))
            .await;
        assert!(!verdict.tripwire_triggered);
    }

    #[tokio::test]
    async fn test_classifier_flags_homework() {
        let provider = Arc::new(MockLlmProvider::with_handler(|request| {
            assert!(request.messages[0].content.contains("- cyber-security homework"));
            Ok(MockLlmProvider::json_response(&json!({
                "is_disallowed": true,
                "category": "cyber-security homework",
                "reasoning": "Asks for graded assignment answers."
            })))
        }));
        let verdict = with_model(provider)
            .invoke(input("Answer question 3 of my network security assignment"))
            .await
            .unwrap();
        assert!(verdict.tripwire_triggered);
        assert!(verdict.reasoning.contains("category: cyber-security homework"));
    }

    #[tokio::test]
    async fn test_classifier_allows() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"is_disallowed": false, "reasoning": "Tax policy question."}));
        let verdict = with_model(provider)
            .check(&input("Latest updates of the IRS 2024 tax code changes"))
            .await;
        assert!(!verdict.tripwire_triggered);
        assert_eq!(verdict.reasoning, "Tax policy question.");
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_closed_by_default() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "mock".into(),
        });
        let verdict = with_model(provider).check(&input("anything")).await;
        assert!(verdict.tripwire_triggered);
    }

    #[tokio::test]
    async fn test_classifier_failure_fail_open() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "mock".into(),
        });
        let verdict = with_model(provider)
            .fail_closed(false)
            .check(&input("anything"))
            .await;
        assert!(!verdict.tripwire_triggered);
    }

    #[test]
    fn test_patterns_compile() {
        assert_eq!(BLOCKED_PATTERNS.len(), 4);
    }
}
