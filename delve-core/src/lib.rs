//! # Delve Core
//!
//! Core library for Delve, an iterative deep-research pipeline.
//! Provides the research orchestrator, LLM interface (brain), guardrails,
//! email delivery, configuration, and fundamental types.

pub mod brain;
pub mod config;
pub mod email;
pub mod error;
pub mod guardrails;
pub mod providers;
pub mod research;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider, StructuredOutput};
pub use config::{DelveConfig, load_config};
pub use email::{DeliveryReceipt, EmailComposer, EmailDispatcher, EmailTransport};
pub use error::{DelveError, Result};
pub use guardrails::{GuardrailInput, GuardrailStage, GuardrailVerdict, SharedGuardrail};
pub use research::{
    EmailStatus, ResearchOrchestrator, ResearchOutcome, ResearchPhase, ResearchRun,
    SearchHit, SearchProvider, StatusEvent, StatusKind,
};
pub use telemetry::{LogTraceSink, TraceSink};
pub use types::{
    EvaluationFeedback, EvaluationScore, ReportData, ResearchRequest, SearchOutcome,
    SearchPlanItem, SearchResult,
};
