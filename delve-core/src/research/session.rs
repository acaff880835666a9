//! Run-scoped research state and its phase machine.
//!
//! A session owns everything that crosses round boundaries: the round
//! counter and the accumulated results. It is discarded when the run ends.

use crate::error::ResearchError;
use crate::types::{EvaluationFeedback, ResearchRequest, SearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current phase of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Start,
    Planning,
    Searching,
    Evaluating,
    Writing,
    GuardrailCheck,
    Emailing,
    Done,
    Error,
}

impl ResearchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchPhase::Done | ResearchPhase::Error)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: ResearchPhase) -> bool {
        use ResearchPhase::*;
        if self.is_terminal() {
            return false;
        }
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Start, Planning)
                | (Planning, Searching)
                | (Searching, Evaluating)
                | (Evaluating, Planning)
                | (Evaluating, Writing)
                | (Planning, Writing)
                | (Writing, GuardrailCheck)
                | (GuardrailCheck, Emailing)
                | (GuardrailCheck, Done)
                | (Emailing, Done)
        )
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResearchPhase::Start => "start",
            ResearchPhase::Planning => "planning",
            ResearchPhase::Searching => "searching",
            ResearchPhase::Evaluating => "evaluating",
            ResearchPhase::Writing => "writing",
            ResearchPhase::GuardrailCheck => "guardrail_check",
            ResearchPhase::Emailing => "emailing",
            ResearchPhase::Done => "done",
            ResearchPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// What one round produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub planned: usize,
    pub found: usize,
    pub feedback: Option<EvaluationFeedback>,
}

#[derive(Debug, Clone)]
pub struct ResearchSession {
    request: ResearchRequest,
    phase: ResearchPhase,
    round: usize,
    max_rounds: usize,
    results: Vec<SearchResult>,
    searched_queries: Vec<String>,
    rounds: Vec<RoundRecord>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(request: ResearchRequest, max_rounds: usize) -> Self {
        let now = Utc::now();
        Self {
            request,
            phase: ResearchPhase::Start,
            round: 0,
            max_rounds: max_rounds.max(1),
            results: Vec::new(),
            searched_queries: Vec::new(),
            rounds: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn request(&self) -> &ResearchRequest {
        &self.request
    }

    pub fn phase(&self) -> ResearchPhase {
        self.phase
    }

    /// 1-based number of the current round; 0 before the first plan.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn searched_queries(&self) -> &[String] {
        &self.searched_queries
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: ResearchPhase) -> Result<(), ResearchError> {
        if !self.phase.can_transition_to(next) {
            return Err(ResearchError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        if next == ResearchPhase::Planning {
            self.round += 1;
        }
        tracing::debug!(
            trace_id = %self.request.trace_id(),
            from = %self.phase,
            to = %next,
            round = self.round,
            "Phase transition"
        );
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enter the terminal error state from wherever the run is.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = ResearchPhase::Error;
            self.updated_at = Utc::now();
        }
    }

    /// Whether another refinement round is allowed.
    pub fn has_rounds_left(&self) -> bool {
        self.round < self.max_rounds
    }

    /// Fold a finished round into the session.
    pub fn record_round(
        &mut self,
        planned: Vec<String>,
        found: Vec<SearchResult>,
        feedback: Option<EvaluationFeedback>,
    ) {
        self.rounds.push(RoundRecord {
            round: self.round,
            planned: planned.len(),
            found: found.len(),
            feedback,
        });
        self.searched_queries.extend(planned);
        self.results.extend(found);
    }

    pub fn last_feedback(&self) -> Option<&EvaluationFeedback> {
        self.rounds.last().and_then(|r| r.feedback.as_ref())
    }
}
