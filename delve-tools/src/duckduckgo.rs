//! DuckDuckGo instant answers provider.
//!
//! Privacy-first and keyless: queries go directly to DuckDuckGo. Coverage is
//! limited to instant answers and related topics, so niche queries often
//! come back empty.

use async_trait::async_trait;
use delve_core::error::SearchError;
use delve_core::research::{SearchHit, SearchProvider};
use serde_json::Value;
use std::time::Duration;

pub const DUCKDUCKGO_BASE_URL: &str = "https://api.duckduckgo.com";

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
}

impl DuckDuckGoSearch {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DUCKDUCKGO_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn failure(message: String) -> SearchError {
        SearchError::ProviderFailure {
            provider: "duckduckgo".to_string(),
            message,
        }
    }
}

/// Extract hits from an instant-answer response: the abstract first, then
/// related topics (including grouped ones), then direct results.
pub fn parse_instant_answers(body: &Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
        && !abstract_text.is_empty()
    {
        let source = body
            .get("AbstractSource")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        let url = body
            .get("AbstractURL")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let heading = body.get("Heading").and_then(|v| v.as_str()).unwrap_or("");
        let title = if heading.is_empty() {
            source.to_string()
        } else {
            format!("{} ({})", heading, source)
        };
        hits.push(SearchHit {
            title,
            url: url.to_string(),
            content: abstract_text.to_string(),
        });
    }

    let mut topics: Vec<&Value> = Vec::new();
    if let Some(related) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
        for topic in related {
            match topic.get("Topics").and_then(|v| v.as_array()) {
                Some(group) => topics.extend(group.iter()),
                None => topics.push(topic),
            }
        }
    }
    if let Some(results) = body.get("Results").and_then(|v| v.as_array()) {
        topics.extend(results.iter());
    }

    for topic in topics {
        if hits.len() >= max_results {
            break;
        }
        let Some(text) = topic.get("Text").and_then(|v| v.as_str()) else {
            continue;
        };
        let url = topic.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
        let title = text.split_once(" - ").map(|(t, _)| t).unwrap_or(text);
        hits.push(SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            content: text.to_string(),
        });
    }

    hits.truncate(max_results);
    hits
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.base_url,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::failure(format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::failure(format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("Failed to parse search response: {}", e)))?;

        let hits = parse_instant_answers(&body, max_results);
        tracing::debug!(query, hits = hits.len(), "DuckDuckGo search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Heading": "Orlando, Florida",
            "AbstractText": "Orlando is a city in Central Florida.",
            "AbstractSource": "Wikipedia",
            "AbstractURL": "https://en.wikipedia.org/wiki/Orlando,_Florida",
            "RelatedTopics": [
                {"Text": "Orlando metropolitan area - Population 2.8 million.", "FirstURL": "https://duckduckgo.com/Orlando_metro"},
                {"Name": "Sports", "Topics": [
                    {"Text": "Orlando Magic - NBA team.", "FirstURL": "https://duckduckgo.com/Orlando_Magic"}
                ]},
                {"FirstURL": "https://duckduckgo.com/no_text"}
            ],
            "Results": []
        })
    }

    #[test]
    fn test_parse_abstract_and_topics() {
        let hits = parse_instant_answers(&sample(), 5);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Orlando, Florida (Wikipedia)");
        assert_eq!(hits[1].title, "Orlando metropolitan area");
        assert_eq!(hits[2].url, "https://duckduckgo.com/Orlando_Magic");
    }

    #[test]
    fn test_parse_respects_max_results() {
        assert_eq!(parse_instant_answers(&sample(), 1).len(), 1);
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(parse_instant_answers(&json!({}), 3).is_empty());
    }

    #[test]
    fn test_name() {
        let search = DuckDuckGoSearch::new(None, Duration::from_secs(5));
        assert_eq!(search.name(), "duckduckgo");
        assert_eq!(search.base_url, DUCKDUCKGO_BASE_URL);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_provider_failure() {
        let search = DuckDuckGoSearch::new(
            Some("http://127.0.0.1:9".into()),
            Duration::from_secs(2),
        );
        let err = search.search("rust", 3).await.unwrap_err();
        assert!(matches!(err, SearchError::ProviderFailure { .. }));
    }
}
