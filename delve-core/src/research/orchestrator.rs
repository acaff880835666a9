//! Research orchestrator: drives one run through the phase machine.
//!
//! Each run is a spawned task that owns its [`ResearchSession`] and the only
//! [`StatusSender`]. Search fan-out is the sole concurrent section; search
//! tasks return outcomes and never touch the status stream. Every external
//! call is raced against the run's cancellation token and against the
//! caller dropping the event receiver.

use super::evaluator::{EvaluationInput, ResultEvaluator};
use super::planner::{PlanGenerator, PlanningInput};
use super::search::{SearchExecutor, SearchLimits, SearchProvider};
use super::session::{ResearchPhase, ResearchSession, RoundRecord};
use super::status::{StatusEvent, StatusKind, StatusSender};
use super::steps::ResearchTool;
use super::writer::{ReportWriter, WritingInput};
use crate::brain::{Brain, LlmProvider};
use crate::config::{DelveConfig, ResearchConfig};
use crate::email::{DeliveryReceipt, DispatchRequest, EmailDispatcher};
use crate::error::{DeliveryError, DelveError, ResearchError};
use crate::guardrails::{
    ContentSafetyGuardrail, GuardrailInput, GuardrailStage, GuardrailVerdict,
    PlaceholderGuardrail, SharedGuardrail,
};
use crate::telemetry::{LogTraceSink, TraceSink};
use crate::types::{
    EvaluationFeedback, ReportData, ResearchRequest, SearchOutcome,
    SearchPlanItem, SearchResult,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// What happened to the email step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmailStatus {
    /// No dispatcher configured.
    Disabled,
    /// A dispatcher exists but the run never reached delivery.
    NotAttempted,
    /// The output guardrail tripped; nothing was sent.
    Suppressed { reasoning: String },
    Sent { receipt: DeliveryReceipt },
    Failed { reason: String },
}

/// Summary of a finished run, returned by the run task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub trace_id: Uuid,
    pub query: String,
    pub report: Option<ReportData>,
    pub rounds: Vec<RoundRecord>,
    pub final_phase: ResearchPhase,
    pub email: EmailStatus,
    /// Output guardrail findings, whether or not email was configured.
    pub report_flags: Vec<String>,
    pub budget_exhausted: bool,
    pub error: Option<String>,
}

impl ResearchOutcome {
    pub fn succeeded(&self) -> bool {
        self.final_phase == ResearchPhase::Done && self.report.is_some()
    }
}

/// Handle onto a running research task.
pub struct ResearchRun {
    trace_id: Uuid,
    events: mpsc::Receiver<StatusEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<ResearchOutcome>,
}

impl ResearchRun {
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Next status event; `None` once the run has finished emitting.
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        self.events.recv().await
    }

    /// Abandon the run. In-flight searches are aborted and no further
    /// events are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Separate the event stream from the completion handle.
    pub fn split(self) -> (ReceiverStream<StatusEvent>, RunHandle) {
        (
            ReceiverStream::new(self.events),
            RunHandle {
                trace_id: self.trace_id,
                cancel: self.cancel,
                handle: self.handle,
            },
        )
    }

    /// The event stream alone. Dropping it cancels the run.
    pub fn into_stream(self) -> ReceiverStream<StatusEvent> {
        self.split().0
    }

    /// Drain every event, then wait for the outcome.
    pub async fn collect(mut self) -> (Vec<StatusEvent>, ResearchOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let (_, handle) = self.split();
        (events, handle.outcome().await)
    }
}

/// Completion half of a [`ResearchRun`].
pub struct RunHandle {
    trace_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<ResearchOutcome>,
}

impl RunHandle {
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn outcome(self) -> ResearchOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(trace_id = %self.trace_id, error = %e, "Research task did not complete");
                ResearchOutcome {
                    trace_id: self.trace_id,
                    query: String::new(),
                    report: None,
                    rounds: Vec::new(),
                    final_phase: ResearchPhase::Error,
                    email: EmailStatus::NotAttempted,
                    report_flags: Vec::new(),
                    budget_exhausted: false,
                    error: Some(format!("research task did not complete: {e}")),
                }
            }
        }
    }
}

/// Builds a [`ResearchOrchestrator`] from its steps.
pub struct OrchestratorBuilder {
    brain: Brain,
    search: Arc<dyn SearchProvider>,
    research: ResearchConfig,
    input_guardrails: Vec<SharedGuardrail>,
    output_guardrails: Vec<SharedGuardrail>,
    email: Option<EmailDispatcher>,
    trace_sink: Arc<dyn TraceSink>,
}

impl OrchestratorBuilder {
    pub fn new(brain: Brain, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            brain,
            search,
            research: ResearchConfig::default(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            email: None,
            trace_sink: Arc::new(LogTraceSink::default()),
        }
    }

    pub fn research_config(mut self, research: ResearchConfig) -> Self {
        self.research = research;
        self
    }

    pub fn input_guardrail(mut self, guardrail: SharedGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn output_guardrail(mut self, guardrail: SharedGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn email(mut self, dispatcher: EmailDispatcher) -> Self {
        self.email = Some(dispatcher);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub fn build(self) -> ResearchOrchestrator {
        let research = self.research;
        let limits = SearchLimits {
            results_per_search: research.results_per_search.max(1),
            summary_word_limit: research.summary_word_limit.max(1),
            timeout: Duration::from_secs(research.search_timeout_secs.max(1)),
        };
        ResearchOrchestrator {
            planner: PlanGenerator::new(self.brain.clone(), research.searches_per_round),
            searcher: Arc::new(SearchExecutor::new(self.search, self.brain.clone(), limits)),
            evaluator: ResultEvaluator::new(self.brain.clone()),
            writer: ReportWriter::new(self.brain, research.min_report_words),
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
            email: self.email,
            trace_sink: self.trace_sink,
            max_rounds: research.effective_max_rounds(),
            step_retries: research.step_retries,
            status_buffer: research.status_buffer.max(1),
        }
    }
}

pub struct ResearchOrchestrator {
    planner: PlanGenerator,
    searcher: Arc<SearchExecutor>,
    evaluator: ResultEvaluator,
    writer: ReportWriter,
    input_guardrails: Vec<SharedGuardrail>,
    output_guardrails: Vec<SharedGuardrail>,
    email: Option<EmailDispatcher>,
    trace_sink: Arc<dyn TraceSink>,
    max_rounds: usize,
    step_retries: usize,
    status_buffer: usize,
}

impl ResearchOrchestrator {
    pub fn builder(brain: Brain, search: Arc<dyn SearchProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(brain, search)
    }

    /// Wire every step from configuration.
    pub fn from_config(
        config: &DelveConfig,
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Result<Self, DeliveryError> {
        let brain = Brain::new(llm, config.llm.retry.clone())
            .with_temperature(config.llm.temperature)
            .with_max_tokens(config.llm.max_tokens);
        let guardrails = &config.guardrails;

        let mut builder = Self::builder(brain.clone(), search)
            .research_config(config.research.clone())
            .trace_sink(Arc::new(LogTraceSink::new(
                config.telemetry.trace_url_template.clone(),
            )));

        if guardrails.input_enabled {
            let mut safety = ContentSafetyGuardrail::new(guardrails.blocked_categories.clone())
                .fail_closed(guardrails.fail_closed);
            if guardrails.model_judge {
                safety = safety.with_classifier(brain.clone());
            }
            builder = builder.input_guardrail(Arc::new(safety));
        }
        if guardrails.output_enabled {
            let mut placeholder = PlaceholderGuardrail::new().fail_closed(guardrails.fail_closed);
            if guardrails.model_judge {
                placeholder = placeholder.with_judge(brain);
            }
            builder = builder.output_guardrail(Arc::new(placeholder));
        }
        if config.email.enabled {
            builder = builder.email(EmailDispatcher::from_config(&config.email)?);
        }
        Ok(builder.build())
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn email_enabled(&self) -> bool {
        self.email.is_some()
    }

    /// Spawn a run for `query` and return its handle. Must be called within
    /// a tokio runtime.
    pub fn start(self: &Arc<Self>, query: impl Into<String>) -> ResearchRun {
        let request = ResearchRequest::new(query);
        let trace_id = request.trace_id();
        let (tx, rx) = mpsc::channel(self.status_buffer);
        let cancel = CancellationToken::new();

        let ctx = RunContext {
            session: ResearchSession::new(request, self.max_rounds),
            status: StatusSender::new(tx, trace_id, Arc::clone(&self.trace_sink)),
            token: cancel.clone(),
            email: if self.email.is_some() {
                EmailStatus::NotAttempted
            } else {
                EmailStatus::Disabled
            },
            report: None,
            report_flags: Vec::new(),
            budget_exhausted: false,
        };

        let this = Arc::clone(self);
        let span = info_span!("research_run", trace_id = %trace_id);
        let handle = tokio::spawn(async move { this.run(ctx).await }.instrument(span));

        ResearchRun {
            trace_id,
            events: rx,
            cancel,
            handle,
        }
    }

    async fn run(&self, mut ctx: RunContext) -> ResearchOutcome {
        info!(query = %ctx.session.request().query(), max_rounds = self.max_rounds, "Research run started");

        let error = match self.drive(&mut ctx).await {
            Ok(()) => None,
            Err(ResearchError::Cancelled) => {
                ctx.session.fail();
                info!("Research run cancelled");
                Some(ResearchError::Cancelled.to_string())
            }
            Err(e) => {
                ctx.session.fail();
                error!(error = %e, "Research run failed");
                let message = e.to_string();
                if let Err(emit_err) = ctx.emit(StatusKind::Error(message.clone())).await {
                    debug!(error = %emit_err, "Error event not delivered");
                }
                Some(message)
            }
        };

        info!(
            phase = %ctx.session.phase(),
            rounds = ctx.session.rounds().len(),
            "Research run finished"
        );
        ctx.into_outcome(error)
    }

    async fn drive(&self, ctx: &mut RunContext) -> Result<(), ResearchError> {
        let trace_id = ctx.status.trace_id();
        ctx.emit(StatusKind::TraceStarted(format!("Trace ID: {trace_id}")))
            .await?;
        if let Some(url) = self.trace_sink.trace_url(trace_id) {
            ctx.emit(StatusKind::Message(format!("View trace: {url}")))
                .await?;
        }

        self.check_input(ctx).await?;

        ctx.session.transition(ResearchPhase::Planning)?;
        loop {
            let round = ctx.session.round();
            let plan = match self.plan_round(ctx, round).await {
                Ok(plan) => plan,
                // Earlier rounds already gathered results; write with those.
                Err(ResearchError::PlanningFailed { reason }) if round > 1 => {
                    warn!(round, reason = %reason, "Refinement planning failed");
                    ctx.emit(StatusKind::Message(format!(
                        "Could not plan round {round} ({reason}); writing the report from what was found"
                    )))
                    .await?;
                    break;
                }
                Err(e) => return Err(e),
            };

            ctx.session.transition(ResearchPhase::Searching)?;
            let found = self.search_round(ctx, &plan).await?;

            ctx.session.transition(ResearchPhase::Evaluating)?;
            let feedback = self.evaluate_round(ctx, &plan, &found, round).await?;
            let passed = feedback.as_ref().is_some_and(EvaluationFeedback::passed);
            let planned = plan.into_iter().map(|item| item.query).collect();
            ctx.session.record_round(planned, found, feedback);

            if passed {
                break;
            }
            if ctx.session.has_rounds_left() {
                ctx.session.transition(ResearchPhase::Planning)?;
                continue;
            }
            ctx.budget_exhausted = true;
            warn!(max_rounds = self.max_rounds, "Round budget exhausted");
            ctx.emit(StatusKind::Message(format!(
                "Research budget exhausted after {} round(s); writing the report from what was found",
                ctx.session.round()
            )))
            .await?;
            break;
        }

        ctx.session.transition(ResearchPhase::Writing)?;
        let report = self.write_report(ctx).await?;
        ctx.report = Some(report.clone());

        ctx.session.transition(ResearchPhase::GuardrailCheck)?;
        let flagged = self.check_output(ctx, &report).await?;

        match (&self.email, flagged) {
            (Some(_), Some(reasoning)) => {
                ctx.emit(StatusKind::Message(format!(
                    "Email suppressed: {reasoning}"
                )))
                .await?;
                ctx.email = EmailStatus::Suppressed { reasoning };
            }
            (Some(dispatcher), None) => {
                ctx.session.transition(ResearchPhase::Emailing)?;
                self.send_email(ctx, dispatcher, &report).await?;
            }
            (None, _) => {}
        }

        ctx.session.transition(ResearchPhase::Done)?;
        ctx.emit(StatusKind::FinalOutput(report.markdown_report))
            .await?;
        Ok(())
    }

    async fn check_input(&self, ctx: &mut RunContext) -> Result<(), ResearchError> {
        let query = ctx.session.request().query().to_string();
        for guardrail in &self.input_guardrails {
            ctx.announce(guardrail.as_ref(), None).await?;
            let input = GuardrailInput::new(&query, GuardrailStage::Input, ctx.status.trace_id());
            let verdict = ctx.race(guardrail.invoke(input)).await?.unwrap_or_else(|e| {
                GuardrailVerdict::trip(format!("{} failed: {e}", guardrail.name()))
            });
            if verdict.tripwire_triggered {
                info!(guardrail = guardrail.name(), "Input guardrail tripped");
                ctx.emit(StatusKind::Message(verdict.reasoning.clone()))
                    .await?;
                return Err(ResearchError::InputBlocked {
                    reasoning: verdict.reasoning,
                });
            }
        }
        Ok(())
    }

    async fn plan_round(
        &self,
        ctx: &mut RunContext,
        round: usize,
    ) -> Result<Vec<SearchPlanItem>, ResearchError> {
        let headline = if round <= 1 {
            "Planning searches...".to_string()
        } else {
            format!("Refining search plan (round {round} of {})...", self.max_rounds)
        };
        ctx.emit(StatusKind::Planning(headline)).await?;
        ctx.announce(&self.planner, Some(format!("round {round}")))
            .await?;

        let input = PlanningInput {
            query: ctx.session.request().query().to_string(),
            round,
            feedback: ctx.session.last_feedback().map(|f| f.feedback.clone()),
            searched_queries: ctx.session.searched_queries().to_vec(),
        };
        let (planner, input) = (&self.planner, &input);
        let plan = self
            .with_step_retries(ctx, "planning", move || {
                let input = input.clone();
                async move {
                    planner.invoke(input).await.map_err(|e| {
                        step_failure(e, |reason| ResearchError::PlanningFailed { reason })
                    })
                }
            })
            .await?;

        ctx.emit(StatusKind::Message(format!(
            "Will perform {} searches",
            plan.len()
        )))
        .await?;
        Ok(plan)
    }

    /// Fan out every planned search and wait for all of them.
    async fn search_round(
        &self,
        ctx: &mut RunContext,
        plan: &[SearchPlanItem],
    ) -> Result<Vec<SearchResult>, ResearchError> {
        let total = plan.len();
        ctx.emit(StatusKind::Searching("Searching...".to_string()))
            .await?;

        let mut tasks = JoinSet::new();
        for (index, item) in plan.iter().cloned().enumerate() {
            ctx.announce(self.searcher.as_ref(), Some(item.query.clone()))
                .await?;
            let searcher = Arc::clone(&self.searcher);
            tasks.spawn(
                async move {
                    let query = item.query.clone();
                    let outcome = searcher
                        .invoke(item)
                        .await
                        .unwrap_or_else(|e| SearchOutcome::NoResult {
                            query,
                            reason: e.to_string(),
                        });
                    (index, outcome)
                }
                .in_current_span(),
            );
        }

        let mut slots: Vec<Option<SearchOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        // Dropping `tasks` on early return aborts whatever is still running.
        while let Some(joined) = ctx.race(tasks.join_next()).await? {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Search task ended abnormally"),
            }
            completed += 1;
            ctx.emit(StatusKind::Searching(format!(
                "Searching... {completed}/{total} completed"
            )))
            .await?;
        }

        let mut found = Vec::with_capacity(total);
        for (slot, item) in slots.into_iter().zip(plan) {
            match slot {
                Some(SearchOutcome::Found(result)) => found.push(result),
                Some(SearchOutcome::NoResult { query, reason }) => {
                    debug!(query = %query, reason = %reason, "Search excluded from aggregation");
                }
                None => debug!(query = %item.query, "Search task lost; treated as no result"),
            }
        }

        ctx.emit(StatusKind::Message(format!(
            "Round {}: {} of {} searches returned results",
            ctx.session.round(),
            found.len(),
            total
        )))
        .await?;
        Ok(found)
    }

    /// `None` when the evaluator could not be reached; the round then counts
    /// as not passed.
    async fn evaluate_round(
        &self,
        ctx: &mut RunContext,
        plan: &[SearchPlanItem],
        found: &[SearchResult],
        round: usize,
    ) -> Result<Option<EvaluationFeedback>, ResearchError> {
        ctx.emit(StatusKind::Message(format!(
            "Evaluating results (round {round})..."
        )))
        .await?;
        ctx.announce(&self.evaluator, Some(format!("round {round}")))
            .await?;

        let input = EvaluationInput {
            query: ctx.session.request().query().to_string(),
            plan: plan.to_vec(),
            results: found.to_vec(),
            round,
        };
        match ctx.race(self.evaluator.invoke(input)).await? {
            Ok(feedback) => {
                ctx.emit(StatusKind::Message(format!(
                    "Evaluation: {}. {}",
                    feedback.score, feedback.feedback
                )))
                .await?;
                Ok(Some(feedback))
            }
            Err(e) => {
                warn!(round, error = %e, "Evaluation failed");
                ctx.emit(StatusKind::Message(format!(
                    "Evaluation failed for round {round}: {e}"
                )))
                .await?;
                Ok(None)
            }
        }
    }

    async fn write_report(&self, ctx: &mut RunContext) -> Result<ReportData, ResearchError> {
        ctx.emit(StatusKind::Writing("Writing report...".to_string()))
            .await?;
        let summaries = ctx.session.results().len();
        ctx.announce(&self.writer, Some(format!("{summaries} summaries")))
            .await?;

        let input = WritingInput {
            query: ctx.session.request().query().to_string(),
            results: ctx.session.results().to_vec(),
        };
        let (writer, input) = (&self.writer, &input);
        let report = self
            .with_step_retries(ctx, "writing", move || {
                let input = input.clone();
                async move {
                    writer.invoke(input).await.map_err(|e| {
                        step_failure(e, |reason| ResearchError::WritingFailed { reason })
                    })
                }
            })
            .await?;
        ctx.emit(StatusKind::Message(format!(
            "Report written ({} words)",
            report.word_count()
        )))
        .await?;
        Ok(report)
    }

    /// Returns the reasoning of the first tripped output guardrail.
    async fn check_output(
        &self,
        ctx: &mut RunContext,
        report: &ReportData,
    ) -> Result<Option<String>, ResearchError> {
        if self.output_guardrails.is_empty() {
            ctx.emit(StatusKind::Message(
                "Output checks skipped: no output guardrail configured".to_string(),
            ))
            .await?;
            return Ok(None);
        }
        let text = report.full_text();
        for guardrail in &self.output_guardrails {
            ctx.announce(guardrail.as_ref(), None).await?;
            let input = GuardrailInput::new(&text, GuardrailStage::Output, ctx.status.trace_id());
            let verdict = ctx.race(guardrail.invoke(input)).await?.unwrap_or_else(|e| {
                GuardrailVerdict::trip(format!("{} failed: {e}", guardrail.name()))
            });
            if verdict.tripwire_triggered {
                info!(guardrail = guardrail.name(), "Output guardrail tripped");
                ctx.report_flags.push(verdict.reasoning.clone());
                if self.email.is_none() {
                    ctx.emit(StatusKind::Message(format!(
                        "Report flagged: {}",
                        verdict.reasoning
                    )))
                    .await?;
                }
                return Ok(Some(verdict.reasoning));
            }
        }
        Ok(None)
    }

    /// Exactly one delivery attempt; failure is reported, not raised.
    async fn send_email(
        &self,
        ctx: &mut RunContext,
        dispatcher: &EmailDispatcher,
        report: &ReportData,
    ) -> Result<(), ResearchError> {
        ctx.emit(StatusKind::Message("Sending email...".to_string()))
            .await?;
        ctx.announce(dispatcher, None).await?;

        let request = DispatchRequest {
            query: ctx.session.request().query().to_string(),
            report: report.clone(),
        };
        match ctx.race(dispatcher.invoke(request)).await? {
            Ok(receipt) => {
                ctx.emit(StatusKind::Message(format!(
                    "Email sent via {}",
                    receipt.transport
                )))
                .await?;
                ctx.email = EmailStatus::Sent { receipt };
            }
            Err(e) => {
                let reason = match e {
                    DelveError::Delivery(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                warn!(error = %reason, "Email delivery failed");
                ctx.emit(StatusKind::Message(format!(
                    "Email delivery failed: {reason}"
                )))
                .await?;
                ctx.email = EmailStatus::Failed { reason };
            }
        }
        Ok(())
    }

    async fn with_step_retries<T, F, Fut>(
        &self,
        ctx: &RunContext,
        step: &'static str,
        op: F,
    ) -> Result<T, ResearchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ResearchError>>,
    {
        let mut attempt = 0;
        loop {
            match ctx.race(op()).await? {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.step_retries => {
                    attempt += 1;
                    warn!(step, attempt, error = %e, "Step failed; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Recover a step's own failure from the tool contract's error.
fn step_failure(e: DelveError, wrap: fn(String) -> ResearchError) -> ResearchError {
    match e {
        DelveError::Research(inner) => inner,
        other => wrap(other.to_string()),
    }
}

/// Everything the run task owns.
struct RunContext {
    session: ResearchSession,
    status: StatusSender,
    token: CancellationToken,
    email: EmailStatus,
    report: Option<ReportData>,
    report_flags: Vec<String>,
    budget_exhausted: bool,
}

impl RunContext {
    async fn emit(&mut self, kind: StatusKind) -> Result<(), ResearchError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ResearchError::Cancelled),
            sent = self.status.emit(kind) => sent,
        }
    }

    /// Report a step invocation under the tool's own name.
    async fn announce<T>(&mut self, tool: &T, detail: Option<String>) -> Result<(), ResearchError>
    where
        T: ResearchTool + ?Sized,
    {
        debug!(tool = tool.name(), kind = %tool.kind(), "Invoking step");
        let label = match detail {
            Some(detail) => format!("{}: {detail}", tool.name()),
            None => tool.name().to_string(),
        };
        self.emit(StatusKind::ToolCalled(label)).await
    }

    /// Run `fut` unless the run is cancelled or its receiver goes away first.
    async fn race<F: Future>(&self, fut: F) -> Result<F::Output, ResearchError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ResearchError::Cancelled),
            _ = self.status.closed() => Err(ResearchError::Cancelled),
            out = fut => Ok(out),
        }
    }

    fn into_outcome(self, error: Option<String>) -> ResearchOutcome {
        ResearchOutcome {
            trace_id: self.status.trace_id(),
            query: self.session.request().query().to_string(),
            report: self.report,
            rounds: self.session.rounds().to_vec(),
            final_phase: self.session.phase(),
            email: self.email,
            report_flags: self.report_flags,
            budget_exhausted: self.budget_exhausted,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::config::RetryConfig;
    use crate::error::SearchError;
    use crate::research::search::SearchHit;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoSearch;

    #[async_trait]
    impl SearchProvider for EchoSearch {
        fn name(&self) -> &str {
            "echo"
        }

        async fn search(&self, query: &str, _max: usize) -> Result<Vec<SearchHit>, SearchError> {
            Ok(vec![SearchHit {
                title: query.to_string(),
                url: "https://example.com".to_string(),
                content: format!("Facts about {query}."),
            }])
        }
    }

    fn scripted() -> Arc<MockLlmProvider> {
        let plans = std::sync::atomic::AtomicUsize::new(0);
        Arc::new(MockLlmProvider::with_handler(move |request| {
            let name = request
                .response_schema
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default();
            let body = match name.as_str() {
                "search_plan" => {
                    let n = plans.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    json!({"searches": [
                        {"reason": "r1", "query": format!("alpha {n}")},
                        {"reason": "r2", "query": format!("beta {n}")}
                    ]})
                }
                "search_summary" => json!({"summary": "A summary."}),
                "evaluation_feedback" => json!({"score": "pass", "feedback": ""}),
                "report_data" => json!({
                    "short_summary": "Short.",
                    "markdown_report": "# Report\n\nBody.",
                    "follow_up_questions": ["Next?"]
                }),
                other => panic!("unexpected schema {other}"),
            };
            Ok(MockLlmProvider::json_response(&body))
        }))
    }

    fn orchestrator(max_rounds: usize) -> Arc<ResearchOrchestrator> {
        let brain = Brain::new(scripted(), RetryConfig::none());
        let research = ResearchConfig {
            max_rounds,
            ..ResearchConfig::default()
        };
        Arc::new(
            ResearchOrchestrator::builder(brain, Arc::new(EchoSearch))
                .research_config(research)
                .output_guardrail(Arc::new(PlaceholderGuardrail::new()))
                .build(),
        )
    }

    #[tokio::test]
    async fn test_run_without_email_ends_with_final_output() {
        let run = orchestrator(2).start("test topic");
        let trace_id = run.trace_id();
        let (events, outcome) = run.collect().await;

        assert!(matches!(events[0].kind, StatusKind::TraceStarted(_)));
        assert!(matches!(events.last().unwrap().kind, StatusKind::FinalOutput(_)));
        assert!(events.iter().all(|e| e.trace_id == trace_id));
        assert!(events.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
        assert_eq!(outcome.final_phase, ResearchPhase::Done);
        assert_eq!(outcome.email, EmailStatus::Disabled);
        // Round 1 never passes, so the scripted pass lands on round 2.
        assert_eq!(outcome.rounds.len(), 2);
        assert!(!outcome.budget_exhausted);
    }

    #[tokio::test]
    async fn test_single_round_budget_is_exhausted() {
        let (events, outcome) = orchestrator(1).start("test topic").collect().await;
        assert!(outcome.budget_exhausted);
        assert_eq!(outcome.rounds.len(), 1);
        assert!(outcome.succeeded());
        assert!(events.iter().any(|e| e.kind.message().contains("budget exhausted")));
    }

    #[tokio::test]
    async fn test_steps_are_reported_by_tool_name() {
        let (events, _) = orchestrator(2).start("test topic").collect().await;
        let called: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.kind {
                StatusKind::ToolCalled(label) => Some(label.clone()),
                _ => None,
            })
            .collect();
        assert!(called.contains(&"plan_searches: round 1".to_string()));
        assert!(called.contains(&"web_search: alpha 0".to_string()));
        assert!(called.contains(&"evaluate_results: round 2".to_string()));
        assert!(called.iter().any(|c| c.starts_with("write_report: ")));
        assert!(called.contains(&"placeholder_check".to_string()));
    }

    #[tokio::test]
    async fn test_missing_output_guardrail_is_announced() {
        let brain = Brain::new(scripted(), RetryConfig::none());
        let orchestrator = Arc::new(
            ResearchOrchestrator::builder(brain, Arc::new(EchoSearch))
                .research_config(ResearchConfig {
                    max_rounds: 2,
                    ..ResearchConfig::default()
                })
                .build(),
        );
        let (events, outcome) = orchestrator.start("test topic").collect().await;
        let messages: Vec<&str> = events.iter().map(|e| e.kind.message()).collect();
        let skipped = messages
            .iter()
            .position(|m| m.starts_with("Output checks skipped"))
            .unwrap();
        let written = messages
            .iter()
            .position(|m| m.starts_with("Report written"))
            .unwrap();
        assert!(written < skipped);
        assert!(matches!(events.last().unwrap().kind, StatusKind::FinalOutput(_)));
        assert!(outcome.report_flags.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_first_event_stops_run() {
        let run = orchestrator(3).start("test topic");
        run.cancel();
        let (events, outcome) = run.collect().await;
        assert!(events.iter().all(|e| !e.kind.is_terminal()));
        assert_eq!(outcome.final_phase, ResearchPhase::Error);
        assert_eq!(outcome.error.as_deref(), Some("Research run was cancelled"));
    }
}
