//! LLM provider implementations.
//!
//! Every supported backend speaks the OpenAI chat completions format; the
//! presets differ only in base URL and credentials. Use `create_provider()`
//! to instantiate one from config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleProvider;

/// Gemini's OpenAI-compatible endpoint.
pub const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, `LlmError::Timeout`, and
/// `LlmError::SchemaViolation`. Permanent errors (auth, bad request) return
/// immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable.
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
            | LlmError::SchemaViolation { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        return server_ms.max(compute_exponential_backoff(config, attempt));
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // up to 25%
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Default base URL for a provider preset.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" => Some(GEMINI_OPENAI_BASE_URL),
        "openai" => Some(OPENAI_BASE_URL),
        "ollama" => Some(OLLAMA_BASE_URL),
        _ => None,
    }
}

/// Create an LLM provider from config.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "gemini" | "openai" | "ollama" | "openai-compatible" => {
            let provider = OpenAiCompatibleProvider::new(config)?;
            tracing::info!(
                provider = %config.provider,
                model = %config.model,
                "Created LLM provider"
            );
            Ok(Arc::new(provider))
        }
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry(&fast_retry(3), || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_retry(3), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::Timeout { timeout_secs: 1 })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::AuthFailed {
                    provider: "x".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_respects_rate_limit_hint() {
        let config = fast_retry(3);
        let err = LlmError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let config = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: false,
            max_retries: 10,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 100);
        assert_eq!(compute_exponential_backoff(&config, 2), 400);
        assert_eq!(compute_exponential_backoff(&config, 5), 500);
    }

    #[test]
    fn test_default_base_urls() {
        assert_eq!(default_base_url("gemini"), Some(GEMINI_OPENAI_BASE_URL));
        assert_eq!(default_base_url("ollama"), Some(OLLAMA_BASE_URL));
        assert!(default_base_url("openai-compatible").is_none());
    }

    #[test]
    fn test_create_provider_unknown() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        let result = create_provider(&config);
        assert!(matches!(
            result,
            Err(LlmError::UnsupportedProvider { .. })
        ));
    }
}
