//! Deep research pipeline.
//!
//! A run moves through a fixed sequence of steps:
//! 1. **Plan**: turn the query into a handful of web searches
//! 2. **Search**: run every planned search concurrently and summarize each
//! 3. **Evaluate**: decide whether another, refined round is needed
//! 4. **Write**: synthesize all summaries into a long-form report
//! 5. **Deliver**: check the report for placeholders, then email it
//!
//! The orchestrator streams a [`StatusEvent`] for every transition and step.

pub mod evaluator;
pub mod orchestrator;
pub mod planner;
pub mod search;
pub mod session;
pub mod status;
pub mod steps;
pub mod writer;

pub use evaluator::{EvaluationInput, ResultEvaluator};
pub use orchestrator::{
    EmailStatus, OrchestratorBuilder, ResearchOrchestrator, ResearchOutcome, ResearchRun,
    RunHandle,
};
pub use planner::{PlanGenerator, PlanningInput};
pub use search::{SearchExecutor, SearchHit, SearchLimits, SearchProvider};
pub use session::{ResearchPhase, ResearchSession, RoundRecord};
pub use status::{StatusEvent, StatusKind, StatusSender};
pub use steps::{ResearchTool, ToolKind};
pub use writer::{ReportWriter, WritingInput};
