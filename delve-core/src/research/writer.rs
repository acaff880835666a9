//! Report writer: synthesizes all gathered summaries into a long-form report.

use super::steps::{ResearchTool, ToolKind};
use crate::brain::{Brain, StructuredOutput};
use crate::error::{DelveError, ResearchError};
use crate::types::{ReportData, SearchResult};
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct WritingInput {
    pub query: String,
    /// Summaries from every round actually executed.
    pub results: Vec<SearchResult>,
}

impl StructuredOutput for ReportData {
    const SCHEMA_NAME: &'static str = "report_data";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "short_summary": {"type": "string", "description": "A short 2-3 sentence summary of the findings"},
                "markdown_report": {"type": "string", "description": "The final report in markdown"},
                "follow_up_questions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Suggested topics to research further"
                }
            },
            "required": ["short_summary", "markdown_report", "follow_up_questions"]
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.short_summary.trim().is_empty() {
            return Err("short_summary is empty".into());
        }
        if self.markdown_report.trim().is_empty() {
            return Err("markdown_report is empty".into());
        }
        Ok(())
    }
}

pub struct ReportWriter {
    brain: Brain,
    min_words: usize,
}

impl ReportWriter {
    pub fn new(brain: Brain, min_words: usize) -> Self {
        Self { brain, min_words }
    }

    fn instructions(&self) -> String {
        format!(
            "You are a senior researcher writing a cohesive report for a research query. You \
             are given the query and summaries of web searches a research assistant made. \
             First draft an outline describing the structure and flow of the report, then \
             expand it into the full report. The report must be in markdown, detailed and \
             lengthy: aim for 5-10 pages and at least {} words. Use only facts supported by \
             the summaries. Never leave template placeholders such as [Your Name] or [Date] \
             in the text. Finish with follow-up questions worth researching next, unless the \
             topic is exhaustively answered.",
            self.min_words
        )
    }

    fn prompt(input: &WritingInput) -> String {
        let mut prompt = format!("Original query: {}\n\nSummarized search results:", input.query);
        if input.results.is_empty() {
            prompt.push_str(
                "\n(none of the searches returned usable results; say so plainly and write \
                 what can be stated with confidence)",
            );
        }
        for result in &input.results {
            prompt.push_str(&format!("\n\n### {}\n{}", result.query, result.summary));
        }
        prompt
    }

    pub async fn write(&self, input: &WritingInput) -> Result<ReportData, ResearchError> {
        let report: ReportData = self
            .brain
            .invoke(&self.instructions(), &Self::prompt(input))
            .await
            .map_err(|e| ResearchError::WritingFailed {
                reason: e.to_string(),
            })?;

        let words = report.word_count();
        if words < self.min_words {
            tracing::warn!(
                words,
                target = self.min_words,
                "Report is shorter than the requested length"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl ResearchTool for ReportWriter {
    type Input = WritingInput;
    type Output = ReportData;

    fn kind(&self) -> ToolKind {
        ToolKind::Write
    }

    async fn invoke(&self, input: WritingInput) -> Result<ReportData, DelveError> {
        Ok(self.write(&input).await?)
    }
}
