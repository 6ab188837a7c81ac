//! Phase Scheduler
//!
//! Drives each project through its lifecycle:
//!
//! ```text
//! pending ─► input_received ─► designing ◄──► awaiting_approval
//!                                  │                  │
//!                                  └──► executing ◄───┘
//!                                           │
//!                                           ▼
//!                                       completed        (any live status ─► failed | cancelled)
//! ```
//!
//! Steps of a stage fan out concurrently and join on a barrier before the
//! stage is consolidated. Each step runs under a timeout with bounded retries
//! and an optional fallback agent.

mod context;
mod orchestrator;
mod policy;
mod runner;
mod worker;

pub use context::{feedback_for, rejection_targets, step_context, steps_to_run};
pub use orchestrator::{
    DecisionAck, Orchestrator, OrchestratorOptions, PlanStepSummary, PlanSummary, ProgressView, StepProgress,
    ValidationReport,
};
pub use policy::StepPolicy;
pub use runner::{CANCELLED_REASON, StepRun, run_step};
