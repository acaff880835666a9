//! Result evaluator: decides whether a round gathered enough to write.
//!
//! The round number is an explicit argument. On round 1 the evaluator never
//! passes, so every run performs at least one refinement.

use super::steps::{ResearchTool, ToolKind};
use crate::brain::{Brain, StructuredOutput};
use crate::error::{DelveError, LlmError};
use crate::types::{EvaluationFeedback, EvaluationScore, SearchPlanItem, SearchResult};
use async_trait::async_trait;
use serde_json::json;

const INSTRUCTIONS: &str = "You evaluate web research. Given the original query, the searches \
that were planned, and the summaries they produced, decide whether the material is sufficient \
to write a thorough, well-sourced report. Score \"pass\" only when the query is fully covered, \
\"needs_improvement\" when important angles are thin or missing, and \"fail\" when the results \
are mostly irrelevant. Be demanding: deeper research is preferred over stopping early. For any \
score other than pass, the feedback must list concrete follow-up searches or angles to cover.";

const FIRST_ROUND_NOTE: &str = "This is the first round of research. Do not score it \"pass\".";

#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub query: String,
    pub plan: Vec<SearchPlanItem>,
    pub results: Vec<SearchResult>,
    /// 1-based round number.
    pub round: usize,
}

impl StructuredOutput for EvaluationFeedback {
    const SCHEMA_NAME: &'static str = "evaluation_feedback";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "score": {"type": "string", "enum": ["pass", "needs_improvement", "fail"]},
                "feedback": {"type": "string", "description": "What is missing and which searches would fill the gaps"}
            },
            "required": ["score", "feedback"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.score != EvaluationScore::Pass && self.feedback.trim().is_empty() {
            return Err("feedback must name follow-up directions when the score is not pass".into());
        }
        Ok(())
    }
}

pub struct ResultEvaluator {
    brain: Brain,
}

impl ResultEvaluator {
    /// Evaluations run deterministic and short.
    pub fn new(brain: Brain) -> Self {
        Self {
            brain: brain.with_temperature(0.0).with_max_tokens(400),
        }
    }

    fn prompt(input: &EvaluationInput) -> String {
        let mut prompt = format!("Original query: {}\nRound: {}\n", input.query, input.round);
        if input.round <= 1 {
            prompt.push_str(FIRST_ROUND_NOTE);
            prompt.push('\n');
        }
        prompt.push_str("\nPlanned searches:");
        for item in &input.plan {
            prompt.push_str(&format!("\n- {} (reason: {})", item.query, item.reason));
        }
        prompt.push_str("\n\nSearch results:");
        if input.results.is_empty() {
            prompt.push_str("\n(no search returned usable results)");
        }
        for result in &input.results {
            prompt.push_str(&format!("\n\n## {}\n{}", result.query, result.summary));
        }
        prompt
    }

    pub async fn evaluate(&self, input: &EvaluationInput) -> Result<EvaluationFeedback, LlmError> {
        let feedback: EvaluationFeedback = self
            .brain
            .invoke(INSTRUCTIONS, &Self::prompt(input))
            .await?;
        let feedback = enforce_round_policy(feedback, input.round);
        tracing::info!(round = input.round, score = %feedback.score, "Evaluation complete");
        Ok(feedback)
    }
}

/// Downgrade a first-round pass.
pub fn enforce_round_policy(feedback: EvaluationFeedback, round: usize) -> EvaluationFeedback {
    if round <= 1 && feedback.score == EvaluationScore::Pass {
        let mut text = feedback.feedback;
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(
            "First-round results are never final: broaden the search with more recent \
             sources and independent confirmations of the key figures.",
        );
        return EvaluationFeedback {
            score: EvaluationScore::NeedsImprovement,
            feedback: text,
        };
    }
    feedback
}

#[async_trait]
impl ResearchTool for ResultEvaluator {
    type Input = EvaluationInput;
    type Output = EvaluationFeedback;

    fn kind(&self) -> ToolKind {
        ToolKind::Evaluate
    }

    async fn invoke(&self, input: EvaluationInput) -> Result<EvaluationFeedback, DelveError> {
        Ok(self.evaluate(&input).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use std::sync::Arc;

    fn input(round: usize) -> EvaluationInput {
        EvaluationInput {
            query: "Compare population of Atlanta and Orlando".into(),
            plan: vec![SearchPlanItem::new("a", "Atlanta population")],
            results: vec![SearchResult {
                query: "Atlanta population".into(),
                summary: "Atlanta has about 510,000 residents.".into(),
            }],
            round,
        }
    }

    fn evaluator(provider: Arc<MockLlmProvider>) -> ResultEvaluator {
        ResultEvaluator::new(Brain::new(provider, RetryConfig::none()))
    }

    #[tokio::test]
    async fn test_round_one_pass_is_downgraded() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"score": "pass", "feedback": "Looks complete."}));
        let feedback = evaluator(provider).evaluate(&input(1)).await.unwrap();
        assert_eq!(feedback.score, EvaluationScore::NeedsImprovement);
        assert!(feedback.feedback.starts_with("Looks complete."));
    }

    #[tokio::test]
    async fn test_round_two_pass_is_kept() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"score": "pass", "feedback": ""}));
        let feedback = evaluator(provider).evaluate(&input(2)).await.unwrap();
        assert!(feedback.passed());
    }

    #[tokio::test]
    async fn test_request_is_deterministic_and_short() {
        let provider = Arc::new(MockLlmProvider::with_handler(|request| {
            assert_eq!(request.temperature, 0.0);
            assert_eq!(request.max_tokens, Some(400));
            assert!(request.messages[1].content.contains(FIRST_ROUND_NOTE));
            Ok(MockLlmProvider::json_response(
                &json!({"score": "fail", "feedback": "Search Orlando census figures."}),
            ))
        }));
        let feedback = evaluator(provider).invoke(input(1)).await.unwrap();
        assert_eq!(feedback.score, EvaluationScore::Fail);
    }

    #[tokio::test]
    async fn test_non_pass_without_feedback_is_rejected() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"score": "needs_improvement", "feedback": "  "}));
        let err = evaluator(provider).evaluate(&input(2)).await.unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation { .. }));
    }

    #[test]
    fn test_enforce_round_policy_leaves_fail_untouched() {
        let feedback = EvaluationFeedback {
            score: EvaluationScore::Fail,
            feedback: "irrelevant".into(),
        };
        assert_eq!(enforce_round_policy(feedback.clone(), 1), feedback);
    }
}
