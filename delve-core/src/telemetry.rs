//! Trace correlation.
//!
//! A run's trace id is announced once at start and attached to every status
//! event. Sinks are advisory: a failing sink is logged and otherwise ignored.

use crate::research::status::StatusEvent;
use uuid::Uuid;

/// Receives every status event of every run.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &StatusEvent) -> Result<(), String>;

    /// Link to an external trace viewer, when one is configured.
    fn trace_url(&self, _trace_id: Uuid) -> Option<String> {
        None
    }
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Default)]
pub struct LogTraceSink {
    url_template: Option<String>,
}

impl LogTraceSink {
    /// `template` may contain `{trace_id}`.
    pub fn new(url_template: Option<String>) -> Self {
        Self { url_template }
    }
}

impl TraceSink for LogTraceSink {
    fn record(&self, event: &StatusEvent) -> Result<(), String> {
        tracing::debug!(
            target: "delve::trace",
            trace_id = %event.trace_id,
            sequence = event.sequence,
            kind = event.kind.name(),
            message = %truncate_for_log(event.kind.message()),
            "status event"
        );
        Ok(())
    }

    fn trace_url(&self, trace_id: Uuid) -> Option<String> {
        self.url_template
            .as_ref()
            .map(|template| template.replace("{trace_id}", &trace_id.to_string()))
    }
}

fn truncate_for_log(message: &str) -> &str {
    const LIMIT: usize = 200;
    if message.len() <= LIMIT {
        return message;
    }
    let mut end = LIMIT;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_url_template() {
        let sink = LogTraceSink::new(Some(
            "https://traces.example.com/trace?trace_id={trace_id}".into(),
        ));
        let id = Uuid::nil();
        assert_eq!(
            sink.trace_url(id).unwrap(),
            "https://traces.example.com/trace?trace_id=00000000-0000-0000-0000-000000000000"
        );
        assert!(LogTraceSink::default().trace_url(id).is_none());
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let long = "é".repeat(150);
        let cut = truncate_for_log(&long);
        assert!(cut.len() <= 200);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
