//! The closed set of steps a research run can invoke.
//!
//! Every step implements [`ResearchTool`], a uniform `(name, description,
//! invoke)` contract. The orchestrator tags each invocation with its
//! [`ToolKind`] when reporting it on the status stream.

use crate::error::DelveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Plan,
    Search,
    Evaluate,
    Write,
    Guardrail,
    Email,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::Plan,
        ToolKind::Search,
        ToolKind::Evaluate,
        ToolKind::Write,
        ToolKind::Guardrail,
        ToolKind::Email,
    ];

    /// Default tool name for this step.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Plan => "plan_searches",
            ToolKind::Search => "web_search",
            ToolKind::Evaluate => "evaluate_results",
            ToolKind::Write => "write_report",
            ToolKind::Guardrail => "guardrail_check",
            ToolKind::Email => "send_email",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::Plan => "Plan a set of web searches that answer the research query",
            ToolKind::Search => "Search the web for one query and summarize the results",
            ToolKind::Evaluate => "Judge whether the gathered results answer the query",
            ToolKind::Write => "Write a long-form markdown report from the gathered results",
            ToolKind::Guardrail => "Classify content against a safety or quality policy",
            ToolKind::Email => "Format the report as HTML and send it by email",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A step the orchestrator can invoke.
#[async_trait]
pub trait ResearchTool: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn kind(&self) -> ToolKind;

    fn name(&self) -> &str {
        self.kind().name()
    }

    fn description(&self) -> &str {
        self.kind().description()
    }

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, DelveError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_unique() {
        let names: HashSet<_> = ToolKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ToolKind::ALL.len());
    }

    #[test]
    fn test_every_tool_has_description() {
        for kind in ToolKind::ALL {
            assert!(!kind.description().is_empty(), "{kind} lacks a description");
        }
    }

    struct Echo;

    #[async_trait]
    impl ResearchTool for Echo {
        type Input = String;
        type Output = String;

        fn kind(&self) -> ToolKind {
            ToolKind::Search
        }

        async fn invoke(&self, input: String) -> Result<String, DelveError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_default_name_and_description_follow_kind() {
        let tool = Echo;
        assert_eq!(tool.name(), "web_search");
        assert_eq!(tool.description(), ToolKind::Search.description());
        assert_eq!(tool.invoke("x".into()).await.unwrap(), "x");
    }
}
