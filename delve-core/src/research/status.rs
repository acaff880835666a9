//! Status events streamed to the caller while a research run progresses.
//!
//! The orchestrator task is the only writer. Events are stamped with the
//! run's trace id and a sequence number as they are committed, so the order
//! a caller observes is the order transitions happened.

use crate::error::ResearchError;
use crate::telemetry::TraceSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// What happened, with a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum StatusKind {
    TraceStarted(String),
    Planning(String),
    Searching(String),
    Writing(String),
    ToolCalled(String),
    Message(String),
    FinalOutput(String),
    Error(String),
}

impl StatusKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatusKind::TraceStarted(_) => "trace_started",
            StatusKind::Planning(_) => "planning",
            StatusKind::Searching(_) => "searching",
            StatusKind::Writing(_) => "writing",
            StatusKind::ToolCalled(_) => "tool_called",
            StatusKind::Message(_) => "message",
            StatusKind::FinalOutput(_) => "final_output",
            StatusKind::Error(_) => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StatusKind::TraceStarted(m)
            | StatusKind::Planning(m)
            | StatusKind::Searching(m)
            | StatusKind::Writing(m)
            | StatusKind::ToolCalled(m)
            | StatusKind::Message(m)
            | StatusKind::FinalOutput(m)
            | StatusKind::Error(m) => m,
        }
    }

    /// `final_output` and `error` end a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusKind::FinalOutput(_) | StatusKind::Error(_))
    }
}

/// One entry of a run's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub trace_id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: StatusKind,
}

/// Single-writer handle onto a run's status channel.
pub struct StatusSender {
    tx: mpsc::Sender<StatusEvent>,
    trace_id: Uuid,
    next_sequence: u64,
    sink: Arc<dyn TraceSink>,
    closed: bool,
}

impl StatusSender {
    pub fn new(tx: mpsc::Sender<StatusEvent>, trace_id: Uuid, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            tx,
            trace_id,
            next_sequence: 0,
            sink,
            closed: false,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Commit an event. Fails with `Cancelled` once the receiver is gone;
    /// nothing is delivered after that point.
    pub async fn emit(&mut self, kind: StatusKind) -> Result<(), ResearchError> {
        if self.closed {
            return Err(ResearchError::Cancelled);
        }
        let event = StatusEvent {
            trace_id: self.trace_id,
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            kind,
        };
        self.next_sequence += 1;

        if let Err(e) = self.sink.record(&event) {
            warn!(trace_id = %self.trace_id, error = %e, "Trace sink failed to record event");
        }

        if self.tx.send(event).await.is_err() {
            self.closed = true;
            return Err(ResearchError::Cancelled);
        }
        Ok(())
    }

    /// Resolves when the caller has dropped the receiving end.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogTraceSink;

    fn sender(buffer: usize) -> (StatusSender, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let sink: Arc<dyn TraceSink> = Arc::new(LogTraceSink::default());
        (StatusSender::new(tx, Uuid::new_v4(), sink), rx)
    }

    #[tokio::test]
    async fn test_emit_assigns_increasing_sequence() {
        let (mut status, mut rx) = sender(8);
        status
            .emit(StatusKind::Planning("Planning searches...".into()))
            .await
            .unwrap();
        status
            .emit(StatusKind::Searching("Searching...".into()))
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.trace_id, status.trace_id());
        assert_eq!(second.kind.name(), "searching");
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_is_cancelled() {
        let (mut status, rx) = sender(8);
        drop(rx);
        let err = status
            .emit(StatusKind::Message("hello".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
        assert!(status.is_closed());
        // Stays closed.
        assert!(status.emit(StatusKind::Message("again".into())).await.is_err());
    }

    #[test]
    fn test_status_kind_serde_shape() {
        let kind = StatusKind::ToolCalled("web_search: rust".into());
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "tool_called");
        assert_eq!(json["message"], "web_search: rust");
        let back: StatusKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(StatusKind::FinalOutput("r".into()).is_terminal());
        assert!(StatusKind::Error("e".into()).is_terminal());
        assert!(!StatusKind::Message("m".into()).is_terminal());
    }
}
