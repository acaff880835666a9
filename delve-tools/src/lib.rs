//! # Delve Tools
//!
//! Web search providers for the Delve research pipeline.
//! - `tavily`: Tavily search API (requires an API key).
//! - `duckduckgo`: DuckDuckGo instant answers (no key, privacy-first).

pub mod duckduckgo;
pub mod tavily;

use delve_core::config::SearchConfig;
use delve_core::error::SearchError;
use delve_core::research::SearchProvider;
use std::sync::Arc;
use std::time::Duration;

pub use duckduckgo::DuckDuckGoSearch;
pub use tavily::TavilySearch;

/// User agent sent with every search request.
pub(crate) const USER_AGENT: &str = concat!("Delve/", env!("CARGO_PKG_VERSION"));

/// Build the configured search provider.
pub fn create_search_provider(
    config: &SearchConfig,
    timeout: Duration,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    match config.provider.as_str() {
        "tavily" => {
            let api_key =
                std::env::var(&config.api_key_env).map_err(|_| SearchError::MissingCredentials {
                    provider: "tavily".to_string(),
                    env_var: config.api_key_env.clone(),
                })?;
            Ok(Arc::new(TavilySearch::new(
                api_key,
                config.base_url.clone(),
                &config.search_depth,
                timeout,
            )))
        }
        "duckduckgo" | "ddg" => Ok(Arc::new(DuckDuckGoSearch::new(
            config.base_url.clone(),
            timeout,
        ))),
        other => Err(SearchError::UnknownProvider {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_duckduckgo_without_key() {
        let config = SearchConfig {
            provider: "duckduckgo".into(),
            ..SearchConfig::default()
        };
        let provider = create_search_provider(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(provider.name(), "duckduckgo");
    }

    #[test]
    fn test_create_tavily_requires_key() {
        let config = SearchConfig {
            api_key_env: "DELVE_TEST_TAVILY_KEY_UNSET".into(),
            ..SearchConfig::default()
        };
        let err = create_search_provider(&config, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::MissingCredentials { .. }));
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = SearchConfig {
            provider: "altavista".into(),
            ..SearchConfig::default()
        };
        let err = create_search_provider(&config, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(err.to_string().contains("altavista"));
    }
}
