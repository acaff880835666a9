//! Tavily search API provider.

use async_trait::async_trait;
use delve_core::error::SearchError;
use delve_core::research::{SearchHit, SearchProvider};
use serde_json::{Value, json};
use std::time::Duration;

pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// Upper bound Tavily accepts for `max_results`.
const MAX_RESULTS_CAP: usize = 20;

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    search_depth: String,
}

impl TavilySearch {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        search_depth: &str,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build()
            .unwrap_or_default();
        let search_depth = match search_depth {
            "advanced" => "advanced",
            _ => "basic",
        };
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| TAVILY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            search_depth: search_depth.to_string(),
        }
    }

    fn request_body(&self, query: &str, max_results: usize) -> Value {
        json!({
            "query": query,
            "max_results": max_results.clamp(1, MAX_RESULTS_CAP),
            "search_depth": self.search_depth,
            "include_answer": false,
        })
    }

    fn failure(message: impl Into<String>) -> SearchError {
        SearchError::ProviderFailure {
            provider: "tavily".to_string(),
            message: message.into(),
        }
    }
}

/// Pull hits out of a Tavily `/search` response body.
pub fn parse_results(payload: &Value, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
    let rows = payload
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TavilySearch::failure("missing results array"))?;

    let hits = rows
        .iter()
        .filter_map(|row| {
            let url = row.get("url").and_then(|v| v.as_str()).unwrap_or("").trim();
            let content = row
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim();
            if url.is_empty() || content.is_empty() {
                return None;
            }
            let title = row
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or(url)
                .trim();
            Some(SearchHit {
                title: title.to_string(),
                url: url.to_string(),
                content: content.to_string(),
            })
        })
        .take(max_results)
        .collect();
    Ok(hits)
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query, max_results))
            .send()
            .await
            .map_err(|e| Self::failure(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(Self::failure(format!("HTTP {}: {}", status, snippet)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("Failed to parse search response: {}", e)))?;
        let hits = parse_results(&payload, max_results)?;
        tracing::debug!(query, hits = hits.len(), "Tavily search complete");
        Ok(hits)
    }
}
