//! Core type definitions for Delve.
//!
//! Two groups live here: the chat messages exchanged with an inference
//! provider, and the research data model that flows between the
//! orchestrator's steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Token usage statistics for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// JSON schema the provider is asked to honor for a structured response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    /// Short identifier, e.g. `search_plan`.
    pub name: String,
    pub schema: serde_json::Value,
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub response_schema: Option<ResponseSchema>,
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: None,
            response_schema: None,
            model: None,
        }
    }
}

/// A response from the LLM.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Research data model
// ---------------------------------------------------------------------------

/// An incoming research query, correlated by a trace id for its whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    query: String,
    trace_id: Uuid,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            trace_id: Uuid::new_v4(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }
}

/// One search to perform and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlanItem {
    pub reason: String,
    pub query: String,
}

impl SearchPlanItem {
    pub fn new(reason: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            query: query.into(),
        }
    }
}

/// A summarized search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub summary: String,
}

/// Outcome of a single search: either a summary or the "no result" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found(SearchResult),
    NoResult { query: String, reason: String },
}

impl SearchOutcome {
    pub fn query(&self) -> &str {
        match self {
            SearchOutcome::Found(result) => &result.query,
            SearchOutcome::NoResult { query, .. } => query,
        }
    }

    pub fn into_result(self) -> Option<SearchResult> {
        match self {
            SearchOutcome::Found(result) => Some(result),
            SearchOutcome::NoResult { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }
}

/// Sufficiency score assigned by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationScore {
    Pass,
    NeedsImprovement,
    Fail,
}

impl std::fmt::Display for EvaluationScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationScore::Pass => write!(f, "pass"),
            EvaluationScore::NeedsImprovement => write!(f, "needs_improvement"),
            EvaluationScore::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationFeedback {
    pub score: EvaluationScore,
    pub feedback: String,
}

impl EvaluationFeedback {
    pub fn passed(&self) -> bool {
        self.score == EvaluationScore::Pass
    }
}

/// The final research report. Its JSON form is the external wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    /// A 2-3 sentence summary of the findings.
    pub short_summary: String,
    /// The full report in markdown.
    pub markdown_report: String,
    /// Suggested topics to research further.
    pub follow_up_questions: Vec<String>,
}

impl ReportData {
    /// Serialize to the external JSON wire form.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the external JSON wire form.
    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// All text a reader of this report would see, for content scanning.
    pub fn full_text(&self) -> String {
        let mut text = String::with_capacity(
            self.short_summary.len() + self.markdown_report.len() + 64,
        );
        text.push_str(&self.short_summary);
        text.push_str("\n\n");
        text.push_str(&self.markdown_report);
        for question in &self.follow_up_questions {
            text.push('\n');
            text.push_str(question);
        }
        text
    }

    pub fn word_count(&self) -> usize {
        self.markdown_report.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
    }

    #[test]
    fn test_research_request_has_unique_trace_ids() {
        let a = ResearchRequest::new("q");
        let b = ResearchRequest::new("q");
        assert_ne!(a.trace_id(), b.trace_id());
        assert_eq!(a.query(), "q");
    }

    #[test]
    fn test_evaluation_score_serde() {
        let json = serde_json::to_string(&EvaluationScore::NeedsImprovement).unwrap();
        assert_eq!(json, "\"needs_improvement\"");
        let parsed: EvaluationScore = serde_json::from_str("\"pass\"").unwrap();
        assert_eq!(parsed, EvaluationScore::Pass);
    }

    #[test]
    fn test_search_outcome_sentinel() {
        let outcome = SearchOutcome::NoResult {
            query: "rust async".into(),
            reason: "timeout".into(),
        };
        assert_eq!(outcome.query(), "rust async");
        assert!(!outcome.is_found());
        assert!(outcome.into_result().is_none());
    }

    #[test]
    fn test_report_wire_field_names() {
        let report = ReportData {
            short_summary: "s".into(),
            markdown_report: "# r".into(),
            follow_up_questions: vec!["q1".into()],
        };
        let value: serde_json::Value = serde_json::from_str(&report.to_wire().unwrap()).unwrap();
        assert_eq!(value["short_summary"], "s");
        assert_eq!(value["markdown_report"], "# r");
        assert_eq!(value["follow_up_questions"][0], "q1");
    }

    #[test]
    fn test_report_full_text_includes_all_parts() {
        let report = ReportData {
            short_summary: "summary".into(),
            markdown_report: "body text".into(),
            follow_up_questions: vec!["next?".into()],
        };
        let text = report.full_text();
        assert!(text.contains("summary"));
        assert!(text.contains("body text"));
        assert!(text.contains("next?"));
        assert_eq!(report.word_count(), 2);
    }
}
