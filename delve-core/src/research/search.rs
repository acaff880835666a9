//! Search executor: one web search, summarized to a bounded length.
//!
//! Failures never propagate. A provider error or timeout becomes
//! [`SearchOutcome::NoResult`] so a single bad query cannot sink a round.

use super::steps::{ResearchTool, ToolKind};
use crate::brain::{Brain, StructuredOutput};
use crate::error::{DelveError, SearchError};
use crate::types::{SearchOutcome, SearchPlanItem, SearchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One raw hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// External web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

const INSTRUCTIONS: &str = "You are a research assistant. Given a search term and the raw \
results of a web search for it, write a concise summary of the results in 2-3 paragraphs and \
under 300 words. Capture the main points, figures, and dates. Write succinctly; complete \
sentences and good grammar are not required. This summary will be used by someone writing a \
report, so keep only the substance and add no commentary of your own.";

#[derive(Debug, Deserialize)]
struct SearchSummary {
    summary: String,
}

impl StructuredOutput for SearchSummary {
    const SCHEMA_NAME: &'static str = "search_summary";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}},
            "required": ["summary"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".into());
        }
        Ok(())
    }
}

/// Limits applied to each search.
#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub results_per_search: usize,
    pub summary_word_limit: usize,
    pub timeout: Duration,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            results_per_search: 3,
            summary_word_limit: 300,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
    brain: Brain,
    limits: SearchLimits,
}

impl SearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>, brain: Brain, limits: SearchLimits) -> Self {
        Self {
            provider,
            brain,
            limits,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one search. Always returns an outcome.
    pub async fn execute(&self, item: &SearchPlanItem) -> SearchOutcome {
        let query = item.query.as_str();
        let timeout_secs = self.limits.timeout.as_secs();

        let hits = match tokio::time::timeout(
            self.limits.timeout,
            self.provider.search(query, self.limits.results_per_search),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => return self.no_result(query, e),
            Err(_) => {
                return self.no_result(
                    query,
                    SearchError::Timeout {
                        query: query.to_string(),
                        timeout_secs,
                    },
                );
            }
        };

        if hits.is_empty() {
            return SearchOutcome::NoResult {
                query: query.to_string(),
                reason: "search returned no results".to_string(),
            };
        }

        let summary = match self.summarize(item, &hits).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(query, error = %e, "Summarization failed; using extractive summary");
                extractive_summary(&hits)
            }
        };

        SearchOutcome::Found(SearchResult {
            query: query.to_string(),
            summary: truncate_words(&summary, self.limits.summary_word_limit),
        })
    }

    async fn summarize(
        &self,
        item: &SearchPlanItem,
        hits: &[SearchHit],
    ) -> Result<String, DelveError> {
        let mut input = format!(
            "Search term: {}\nReason for searching: {}\n\nResults:",
            item.query, item.reason
        );
        for (i, hit) in hits.iter().enumerate() {
            input.push_str(&format!(
                "\n\n[{}] {}\nURL: {}\n{}",
                i + 1,
                hit.title,
                hit.url,
                hit.content
            ));
        }
        let summary = tokio::time::timeout(
            self.limits.timeout,
            self.brain.invoke::<SearchSummary>(INSTRUCTIONS, &input),
        )
        .await
        .map_err(|_| crate::error::LlmError::Timeout {
            timeout_secs: self.limits.timeout.as_secs(),
        })??;
        Ok(summary.summary)
    }

    fn no_result(&self, query: &str, error: SearchError) -> SearchOutcome {
        warn!(
            provider = self.provider.name(),
            query,
            error = %error,
            "Search failed; recording no result"
        );
        SearchOutcome::NoResult {
            query: query.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl ResearchTool for SearchExecutor {
    type Input = SearchPlanItem;
    type Output = SearchOutcome;

    fn kind(&self) -> ToolKind {
        ToolKind::Search
    }

    async fn invoke(&self, input: SearchPlanItem) -> Result<SearchOutcome, DelveError> {
        let outcome = self.execute(&input).await;
        debug!(query = %input.query, found = outcome.is_found(), "Search resolved");
        Ok(outcome)
    }
}

/// Join the hits' snippets when no model summary is available.
fn extractive_summary(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            if hit.title.is_empty() {
                hit.content.trim().to_string()
            } else {
                format!("{}: {}", hit.title.trim(), hit.content.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Keep at most `limit` words, preserving paragraph breaks.
pub fn truncate_words(text: &str, limit: usize) -> String {
    let mut remaining = limit;
    let mut paragraphs = Vec::new();
    for paragraph in text.split("\n\n") {
        if remaining == 0 {
            break;
        }
        let words: Vec<&str> = paragraph.split_whitespace().take(remaining).collect();
        if words.is_empty() {
            continue;
        }
        remaining -= words.len();
        paragraphs.push(words.join(" "));
    }
    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;

    struct FixedProvider {
        result: Result<Vec<SearchHit>, ()>,
        delay: Duration,
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, SearchError> {
            tokio::time::sleep(self.delay).await;
            self.result.clone().map_err(|_| SearchError::ProviderFailure {
                provider: "fixed".into(),
                message: "HTTP 500".into(),
            })
        }
    }

    fn hit(content: &str) -> SearchHit {
        SearchHit {
            title: "Title".into(),
            url: "https://example.com".into(),
            content: content.into(),
        }
    }

    fn executor(
        provider: FixedProvider,
        llm: Arc<MockLlmProvider>,
        limits: SearchLimits,
    ) -> SearchExecutor {
        SearchExecutor::new(
            Arc::new(provider),
            Brain::new(llm, RetryConfig::none()),
            limits,
        )
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("a b c d", 2), "a b");
        assert_eq!(truncate_words("a b\n\nc d", 3), "a b\n\nc");
        assert_eq!(truncate_words("a  b", 10), "a b");
        assert_eq!(truncate_words("", 10), "");
    }

    #[tokio::test]
    async fn test_execute_summarizes_and_clamps() {
        let llm = Arc::new(MockLlmProvider::new());
        let long = "word ".repeat(500);
        llm.queue_json(json!({"summary": long}));
        let exec = executor(
            FixedProvider {
                result: Ok(vec![hit("Atlanta had 510,000 residents")]),
                delay: Duration::ZERO,
            },
            llm,
            SearchLimits::default(),
        );
        let outcome = exec
            .execute(&SearchPlanItem::new("size", "Atlanta population"))
            .await;
        match outcome {
            SearchOutcome::Found(result) => {
                assert_eq!(result.query, "Atlanta population");
                assert_eq!(result.summary.split_whitespace().count(), 300);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_sentinel() {
        let exec = executor(
            FixedProvider {
                result: Err(()),
                delay: Duration::ZERO,
            },
            Arc::new(MockLlmProvider::new()),
            SearchLimits::default(),
        );
        let outcome = exec
            .invoke(SearchPlanItem::new("r", "broken query"))
            .await
            .unwrap();
        match outcome {
            SearchOutcome::NoResult { query, reason } => {
                assert_eq!(query, "broken query");
                assert!(reason.contains("HTTP 500"));
            }
            other => panic!("expected sentinel, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_sentinel() {
        let exec = executor(
            FixedProvider {
                result: Ok(vec![hit("late")]),
                delay: Duration::from_millis(200),
            },
            Arc::new(MockLlmProvider::new()),
            SearchLimits {
                timeout: Duration::from_millis(20),
                ..SearchLimits::default()
            },
        );
        let outcome = exec.execute(&SearchPlanItem::new("r", "slow")).await;
        assert!(!outcome.is_found());
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back_to_snippets() {
        let llm = Arc::new(MockLlmProvider::new());
        llm.queue_response(MockLlmProvider::text_response("not json"));
        let exec = executor(
            FixedProvider {
                result: Ok(vec![hit("Orlando grew 2% last year")]),
                delay: Duration::ZERO,
            },
            llm,
            SearchLimits::default(),
        );
        let outcome = exec.execute(&SearchPlanItem::new("r", "Orlando growth")).await;
        let result = outcome.into_result().expect("fallback summary");
        assert_eq!(result.summary, "Title: Orlando grew 2% last year");
    }

    #[tokio::test]
    async fn test_empty_hits_is_sentinel() {
        let exec = executor(
            FixedProvider {
                result: Ok(vec![]),
                delay: Duration::ZERO,
            },
            Arc::new(MockLlmProvider::new()),
            SearchLimits::default(),
        );
        assert!(!exec.execute(&SearchPlanItem::new("r", "nothing")).await.is_found());
    }
}
