//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config files ->
//! environment -> programmatic overrides. Configuration is loaded from the
//! user config directory (`~/.config/delve/config.toml` on Linux) and/or
//! `.delve/config.toml` in the workspace directory.
//!
//! Secrets never live in configuration. Only the *names* of the environment
//! variables holding them do (`api_key_env`, `password_env`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::email::EmailConfig;
use crate::error::ConfigError;

/// Upper bound for `research.max_rounds`.
pub const MAX_ROUNDS_CEILING: usize = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub search: SearchConfig,
    pub guardrails: GuardrailConfig,
    pub email: EmailConfig,
    pub telemetry: TelemetryConfig,
}

impl DelveConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for w in self.llm.validate() {
            warnings.push(format!("[llm] {}", w));
        }
        for w in self.research.validate() {
            warnings.push(format!("[research] {}", w));
        }
        for w in self.email.validate() {
            warnings.push(format!("[email] {}", w));
        }
        warnings
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "gemini", "openai", "ollama", or "openai-compatible".
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.0-flash", "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Retry policy for transient inference failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.7,
            request_timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the range 0.0-2.0",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; every completion will be empty".to_string());
        }
        if self.api_key_env.is_empty() && self.provider != "ollama" {
            warnings.push("api_key_env is empty; requests will be unauthenticated".to_string());
        }
        if let Some(url) = &self.base_url
            && url::Url::parse(url).is_err()
        {
            warnings.push(format!("base_url '{}' is not a valid URL", url));
        }
        warnings
    }
}

/// Exponential backoff policy for transient inference errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Limits and sizes for the research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum plan/search/evaluate rounds before writing with what was gathered.
    pub max_rounds: usize,
    /// Number of searches the planner is asked for each round.
    pub searches_per_round: usize,
    /// Raw results requested from the search provider per query.
    pub results_per_search: usize,
    /// Hard cap on the words in one search summary.
    pub summary_word_limit: usize,
    /// Per-search timeout; an expired search becomes a "no result".
    pub search_timeout_secs: u64,
    /// Extra attempts for the planning and writing steps.
    pub step_retries: usize,
    /// Target length of the markdown report.
    pub min_report_words: usize,
    /// Capacity of the status event channel.
    pub status_buffer: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            searches_per_round: 5,
            results_per_search: 3,
            summary_word_limit: 300,
            search_timeout_secs: 30,
            step_retries: 1,
            min_report_words: 1000,
            status_buffer: 64,
        }
    }
}

impl ResearchConfig {
    /// `max_rounds` clamped to `1..=MAX_ROUNDS_CEILING`.
    pub fn effective_max_rounds(&self) -> usize {
        self.max_rounds.clamp(1, MAX_ROUNDS_CEILING)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_rounds == 0 || self.max_rounds > MAX_ROUNDS_CEILING {
            warnings.push(format!(
                "max_rounds ({}) is outside 1-{}; it will be clamped to {}",
                self.max_rounds,
                MAX_ROUNDS_CEILING,
                self.effective_max_rounds()
            ));
        }
        if self.searches_per_round == 0 {
            warnings.push("searches_per_round is 0; planning will always fail".to_string());
        }
        if self.summary_word_limit < 50 {
            warnings.push(format!(
                "summary_word_limit ({}) is very small; summaries will be truncated heavily",
                self.summary_word_limit
            ));
        }
        warnings
    }
}

/// Web search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name: "tavily" or "duckduckgo".
    pub provider: String,
    /// Environment variable holding the provider API key (ignored by DuckDuckGo).
    pub api_key_env: String,
    /// Optional endpoint override.
    pub base_url: Option<String>,
    /// Tavily search depth: "basic" or "advanced".
    pub search_depth: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: None,
            search_depth: "basic".to_string(),
        }
    }
}

/// Guardrail policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Run the content-safety check on incoming queries.
    pub input_enabled: bool,
    /// Run the placeholder check before sending email.
    pub output_enabled: bool,
    /// Ask the model about ambiguous cases instead of tripping on them.
    pub model_judge: bool,
    /// Block the run when the input classifier itself is unavailable.
    pub fail_closed: bool,
    /// Request categories the input guardrail refuses.
    pub blocked_categories: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            input_enabled: true,
            output_enabled: true,
            model_judge: true,
            fail_closed: true,
            blocked_categories: vec![
                "cyber-security homework or graded exam answers".to_string(),
                "step-by-step instructions for malware, exploits, or unauthorized intrusion"
                    .to_string(),
                "synthesis of weapons capable of mass casualties".to_string(),
            ],
        }
    }
}

/// Trace correlation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// URL template for viewing a trace; `{trace_id}` is substituted.
    pub trace_url_template: Option<String>,
}

/// Load configuration from all sources, merged in order of precedence:
///
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. An explicit config file (e.g., from `--config`)
/// 4. Workspace-local config (`.delve/config.toml`)
/// 5. User config (`~/.config/delve/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "delve", "delve") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".delve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // DELVE_LLM__MODEL, DELVE_RESEARCH__MAX_ROUNDS, etc.
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::from(Box::new(e)))
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = directories::ProjectDirs::from("dev", "delve", "delve")
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".delve").join("config.toml").exists())
}
