//! Error types for the Delve research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering inference, search, research orchestration, delivery, and
//! configuration.

use std::path::PathBuf;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Inference failure: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Response did not match schema '{schema}': {message}")]
    SchemaViolation { schema: String, message: String },

    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from a web search provider. Never fatal to a research round.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search provider '{provider}' failed: {message}")]
    ProviderFailure { provider: String, message: String },

    #[error("Search provider '{provider}' is missing credentials: env var '{env_var}' not set")]
    MissingCredentials { provider: String, env_var: String },

    #[error("Search for '{query}' timed out after {timeout_secs}s")]
    Timeout { query: String, timeout_secs: u64 },

    #[error("Unknown search provider: {name}")]
    UnknownProvider { name: String },
}

/// Errors that abort a research run.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Planning failed: {reason}")]
    PlanningFailed { reason: String },

    #[error("Report writing failed: {reason}")]
    WritingFailed { reason: String },

    #[error("Request blocked by input guardrail: {reasoning}")]
    InputBlocked { reasoning: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Research run was cancelled")]
    Cancelled,
}

/// Errors from the email dispatcher and its transports.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Email delivery is not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to compose email: {message}")]
    Compose { message: String },

    #[error("Transport '{transport}' failed: {message}")]
    TransportFailed { transport: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<Box<figment::Error>> for ConfigError {
    fn from(err: Box<figment::Error>) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
