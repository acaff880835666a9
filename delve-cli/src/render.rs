//! Terminal rendering of status events.

use delve_core::{StatusEvent, StatusKind};
use std::io::Write;

pub struct Renderer {
    json: bool,
    quiet: bool,
}

impl Renderer {
    pub fn new(json: bool, quiet: bool) -> Self {
        Self { json, quiet }
    }

    pub fn print(&mut self, event: &StatusEvent) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if let Some(line) = self.format(event)? {
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        Ok(())
    }

    /// The text to print for `event`, or `None` when it is filtered out.
    pub fn format(&self, event: &StatusEvent) -> anyhow::Result<Option<String>> {
        if self.json {
            return Ok(Some(serde_json::to_string(event)?));
        }
        let line = match &event.kind {
            StatusKind::FinalOutput(report) => {
                if self.quiet {
                    report.clone()
                } else {
                    format!("\n{}\n\n{}", "─".repeat(60), report)
                }
            }
            StatusKind::Error(message) => format!("✗ Error: {}", message),
            _ if self.quiet => return Ok(None),
            StatusKind::TraceStarted(m) => format!("● {}", m),
            StatusKind::ToolCalled(m) => format!("  ↳ {}", m),
            other => format!("  {}", other.message()),
        };
        Ok(Some(line))
    }
}
