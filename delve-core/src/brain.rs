//! Brain module: LLM provider abstraction and structured invocation.
//!
//! `LlmProvider` is the model-agnostic completion interface. `Brain` wraps a
//! provider with a retry policy and turns free-form completions into
//! schema-validated values through [`StructuredOutput`].

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, ResponseSchema, TokenUsage,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether this provider honors `response_schema` natively.
    fn supports_structured_output(&self) -> bool {
        false
    }
}

/// A value the model is asked to produce as JSON.
pub trait StructuredOutput: DeserializeOwned + Send {
    /// Identifier sent alongside the schema.
    const SCHEMA_NAME: &'static str;

    /// JSON schema describing the expected object.
    fn schema() -> serde_json::Value;

    /// Semantic checks serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Retrying, schema-validating front end to an [`LlmProvider`].
#[derive(Clone)]
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self {
            provider,
            retry,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Run one role-instructed call and parse the answer into `T`.
    ///
    /// Transport errors and schema violations are both retried under the
    /// configured policy; anything else surfaces immediately.
    pub async fn invoke<T: StructuredOutput>(
        &self,
        instructions: &str,
        input: &str,
    ) -> Result<T, LlmError> {
        let schema = T::schema();
        let system = format!(
            "{instructions}\n\nRespond with a single JSON object that matches this JSON schema \
             and nothing else:\n{schema}"
        );

        let (value, usage) = with_retry(&self.retry, || {
            let request = CompletionRequest {
                messages: vec![Message::system(system.clone()), Message::user(input)],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                response_schema: Some(ResponseSchema {
                    name: T::SCHEMA_NAME.to_string(),
                    schema: schema.clone(),
                }),
                model: None,
            };
            async move {
                let response = self.provider.complete(request).await?;
                let parsed = parse_structured::<T>(&response.message.content)?;
                Ok((parsed, response.usage))
            }
        })
        .await?;

        debug!(
            schema = T::SCHEMA_NAME,
            model = self.provider.model_name(),
            tokens = usage.total(),
            "Structured response accepted"
        );
        Ok(value)
    }
}

/// Parse and validate a structured response body.
pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, LlmError> {
    let json = extract_json(raw).ok_or_else(|| LlmError::SchemaViolation {
        schema: T::SCHEMA_NAME.to_string(),
        message: "no JSON object found in response".to_string(),
    })?;
    let value: T = serde_json::from_str(json).map_err(|e| LlmError::SchemaViolation {
        schema: T::SCHEMA_NAME.to_string(),
        message: e.to_string(),
    })?;
    value.validate().map_err(|message| LlmError::SchemaViolation {
        schema: T::SCHEMA_NAME.to_string(),
        message,
    })?;
    Ok(value)
}

/// Locate the JSON object in a model response.
///
/// Accepts bare JSON, fenced ```json blocks, and objects surrounded by prose.
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let fenced = body[..end].trim();
            if fenced.starts_with('{') {
                return Some(fenced);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

type MockHandler = dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync;

/// A mock LLM provider for testing.
///
/// Answers from a handler when one is set, otherwise pops queued responses
/// in order.
pub struct MockLlmProvider {
    model: String,
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    handler: Option<Box<MockHandler>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: std::sync::Mutex::new(Vec::new()),
            handler: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Create a MockLlmProvider that answers every request with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Ok(response));
        }
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(Err(error));
        }
    }

    /// Queue a JSON value as the next response body.
    pub fn queue_json(&self, value: serde_json::Value) {
        self.queue_response(Self::json_response(&value));
    }

    /// Number of `complete` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a response whose body is `value` serialized as JSON.
    pub fn json_response(value: &serde_json::Value) -> CompletionResponse {
        Self::text_response(&value.to_string())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(handler) = &self.handler {
            return handler(&request);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| (!responses.is_empty()).then(|| responses.remove(0)));
        next.unwrap_or_else(|| {
            Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            ))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_structured_output(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
        note: String,
    }

    impl StructuredOutput for Verdict {
        const SCHEMA_NAME: &'static str = "verdict";

        fn schema() -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"ok": {"type": "boolean"}, "note": {"type": "string"}},
                "required": ["ok", "note"]
            })
        }

        fn validate(&self) -> Result<(), String> {
            if self.note.trim().is_empty() {
                return Err("note must not be empty".into());
            }
            Ok(())
        }
    }

    fn brain(provider: Arc<MockLlmProvider>, retries: u32) -> Brain {
        let retry = RetryConfig {
            max_retries: retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter: false,
            ..RetryConfig::default()
        };
        Brain::new(provider, retry)
    }

    #[test]
    fn test_extract_json_bare() {
        assert_eq!(extract_json(r#" {"a":1} "#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let raw = "Sure! {\"a\": {\"b\": 2}} hope that helps";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_parse_structured_validation_failure() {
        let err = parse_structured::<Verdict>(r#"{"ok": true, "note": "  "}"#).unwrap_err();
        match err {
            LlmError::SchemaViolation { schema, message } => {
                assert_eq!(schema, "verdict");
                assert!(message.contains("note"));
            }
            other => panic!("Expected SchemaViolation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_parses_response() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_json(json!({"ok": true, "note": "fine"}));
        let result: Verdict = brain(provider.clone(), 0)
            .invoke("Judge things.", "input")
            .await
            .unwrap();
        assert_eq!(
            result,
            Verdict {
                ok: true,
                note: "fine".into()
            }
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invoke_retries_schema_violation() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_response(MockLlmProvider::text_response("not json at all"));
        provider.queue_json(json!({"ok": false, "note": "second try"}));
        let result: Verdict = brain(provider.clone(), 2)
            .invoke("Judge things.", "input")
            .await
            .unwrap();
        assert_eq!(result.note, "second try");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invoke_does_not_retry_auth_failure() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "mock".into(),
        });
        provider.queue_json(json!({"ok": true, "note": "unreachable"}));
        let result = brain(provider.clone(), 3)
            .invoke::<Verdict>("Judge things.", "input")
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invoke_sends_schema_and_instructions() {
        let provider = Arc::new(MockLlmProvider::with_handler(|request| {
            let schema = request.response_schema.as_ref().expect("schema attached");
            assert_eq!(schema.name, "verdict");
            assert!(request.messages[0].content.starts_with("Judge things."));
            assert_eq!(request.messages[1].content, "the input");
            Ok(MockLlmProvider::json_response(
                &json!({"ok": true, "note": "checked"}),
            ))
        }));
        let result: Verdict = brain(provider, 0)
            .with_temperature(0.0)
            .invoke("Judge things.", "the input")
            .await
            .unwrap();
        assert!(result.ok);
    }
}
