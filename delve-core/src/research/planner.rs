//! Plan generator: turns a research query into a short list of web searches.

use super::steps::{ResearchTool, ToolKind};
use crate::brain::{Brain, StructuredOutput};
use crate::error::{DelveError, ResearchError};
use crate::types::SearchPlanItem;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

const INSTRUCTIONS: &str = "You are a research planner. Given a research query, design a set \
of web searches that together answer it as completely as possible. For each search give the \
reason it matters and a short, keyword-style query (a few words, no full sentences). Cover \
distinct angles and avoid overlapping queries.";

/// What the planner needs for one round.
#[derive(Debug, Clone, Default)]
pub struct PlanningInput {
    pub query: String,
    pub round: usize,
    /// Evaluator feedback from the previous round.
    pub feedback: Option<String>,
    /// Queries already run in earlier rounds.
    pub searched_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPlan {
    searches: Vec<SearchPlanItem>,
}

impl StructuredOutput for SearchPlan {
    const SCHEMA_NAME: &'static str = "search_plan";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "searches": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "reason": {"type": "string", "description": "Why this search helps answer the query"},
                            "query": {"type": "string", "description": "The search term"}
                        },
                        "required": ["reason", "query"]
                    }
                }
            },
            "required": ["searches"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.searches.is_empty() {
            return Err("plan contains no searches".into());
        }
        Ok(())
    }
}

pub struct PlanGenerator {
    brain: Brain,
    searches_per_round: usize,
}

impl PlanGenerator {
    pub fn new(brain: Brain, searches_per_round: usize) -> Self {
        Self {
            brain,
            searches_per_round: searches_per_round.max(1),
        }
    }

    pub fn searches_per_round(&self) -> usize {
        self.searches_per_round
    }

    fn prompt(&self, input: &PlanningInput) -> String {
        let mut prompt = format!(
            "Query: {}\nPlan exactly {} searches for round {}.",
            input.query, self.searches_per_round, input.round
        );
        if let Some(feedback) = &input.feedback {
            prompt.push_str("\n\nFeedback on the previous round's results:\n");
            prompt.push_str(feedback);
            prompt.push_str("\nAddress the gaps named in the feedback.");
        }
        if !input.searched_queries.is_empty() {
            prompt.push_str("\n\nAlready searched (do not repeat):");
            for q in &input.searched_queries {
                prompt.push_str("\n- ");
                prompt.push_str(q);
            }
        }
        prompt
    }

    /// Produce this round's plan.
    pub async fn plan(&self, input: &PlanningInput) -> Result<Vec<SearchPlanItem>, ResearchError> {
        let raw: SearchPlan = self
            .brain
            .invoke(INSTRUCTIONS, &self.prompt(input))
            .await
            .map_err(|e| ResearchError::PlanningFailed {
                reason: e.to_string(),
            })?;

        let plan = normalize_plan(raw.searches, &input.searched_queries, self.searches_per_round);
        if plan.is_empty() {
            return Err(ResearchError::PlanningFailed {
                reason: "plan had no usable searches after removing empty and repeated queries"
                    .to_string(),
            });
        }
        tracing::debug!(round = input.round, searches = plan.len(), "Search plan ready");
        Ok(plan)
    }
}

#[async_trait]
impl ResearchTool for PlanGenerator {
    type Input = PlanningInput;
    type Output = Vec<SearchPlanItem>;

    fn kind(&self) -> ToolKind {
        ToolKind::Plan
    }

    async fn invoke(&self, input: PlanningInput) -> Result<Vec<SearchPlanItem>, DelveError> {
        Ok(self.plan(&input).await?)
    }
}

fn dedup_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim items, drop empty ones, remove repeats (including earlier rounds'
/// queries), and cap the count.
pub fn normalize_plan(
    items: Vec<SearchPlanItem>,
    already_searched: &[String],
    limit: usize,
) -> Vec<SearchPlanItem> {
    let mut seen: HashSet<String> = already_searched.iter().map(|q| dedup_key(q)).collect();
    items
        .into_iter()
        .filter_map(|item| {
            let reason = item.reason.trim();
            let query = item.query.trim();
            if reason.is_empty() || query.is_empty() {
                return None;
            }
            seen.insert(dedup_key(query))
                .then(|| SearchPlanItem::new(reason, query))
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use std::sync::Arc;

    fn planner(provider: Arc<MockLlmProvider>, n: usize) -> PlanGenerator {
        PlanGenerator::new(Brain::new(provider, RetryConfig::none()), n)
    }

    #[test]
    fn test_normalize_drops_empty_and_duplicates() {
        let items = vec![
            SearchPlanItem::new("population", "Atlanta population 2024"),
            SearchPlanItem::new("", "no reason"),
            SearchPlanItem::new("dup", "  atlanta   POPULATION 2024 "),
            SearchPlanItem::new("other", "Orlando population 2024"),
            SearchPlanItem::new("blank", "   "),
        ];
        let plan = normalize_plan(items, &[], 5);
        assert_eq!(
            plan,
            vec![
                SearchPlanItem::new("population", "Atlanta population 2024"),
                SearchPlanItem::new("other", "Orlando population 2024"),
            ]
        );
    }

    #[test]
    fn test_normalize_excludes_previous_rounds_and_caps() {
        let items = (0..8)
            .map(|i| SearchPlanItem::new("r", format!("query {i}")))
            .collect();
        let plan = normalize_plan(items, &["Query 0".to_string()], 3);
        let queries: Vec<_> = plan.iter().map(|p| p.query.as_str()).collect();
        assert_eq!(queries, vec!["query 1", "query 2", "query 3"]);
    }

    #[tokio::test]
    async fn test_plan_success() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"searches": [
            {"reason": "baseline", "query": "rust async runtimes"},
            {"reason": "comparison", "query": "tokio vs async-std"}
        ]}));
        let plan = planner(provider, 5)
            .plan(&PlanningInput {
                query: "Which Rust async runtime?".into(),
                round: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].query, "tokio vs async-std");
    }

    #[tokio::test]
    async fn test_plan_unparsable_is_planning_failed() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_response(MockLlmProvider::text_response("I cannot plan this."));
        let err = planner(provider, 5)
            .plan(&PlanningInput {
                query: "q".into(),
                round: 1,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::PlanningFailed { .. }));
    }

    #[tokio::test]
    async fn test_plan_all_repeats_is_planning_failed() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"searches": [{"reason": "again", "query": "old query"}]}));
        let err = planner(provider, 5)
            .plan(&PlanningInput {
                query: "q".into(),
                round: 2,
                feedback: Some("dig deeper".into()),
                searched_queries: vec!["old query".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::PlanningFailed { .. }));
    }

    #[tokio::test]
    async fn test_prompt_carries_feedback_and_history() {
        let provider = Arc::new(MockLlmProvider::with_handler(|request| {
            let user = &request.messages[1].content;
            assert!(user.contains("Feedback on the previous round's results:\nneed 2023 data"));
            assert!(user.contains("- first query"));
            Ok(MockLlmProvider::json_response(
                &json!({"searches": [{"reason": "gap", "query": "2023 census data"}]}),
            ))
        }));
        let plan = planner(provider, 5)
            .invoke(PlanningInput {
                query: "q".into(),
                round: 2,
                feedback: Some("need 2023 data".into()),
                searched_queries: vec!["first query".into()],
            })
            .await
            .unwrap();
        assert_eq!(plan[0].query, "2023 census data");
    }
}
