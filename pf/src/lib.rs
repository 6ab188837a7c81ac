//! ProjectForge - multi-agent project scaffolding orchestrator
//!
//! Turns a project intake (a discovery brief or a direct technical spec) into
//! an execution plan of agent steps, then drives that plan through design,
//! human approval and execution while streaming progress to subscribers.
//!
//! # Modules
//!
//! - [`intake`] - request validation and normalization
//! - [`planner`] - template catalogue and execution plan builder
//! - [`scheduler`] - lifecycle state machine, step runner and the [`Orchestrator`]
//! - [`gate`] - approval gates
//! - [`aggregate`] - stage consolidation and conflict detection
//! - [`agent`] - agent adapters (builtin, HTTP)
//! - [`events`] - progress event bus and audit recorder
//! - [`state`] - SQLite project store behind an actor
//! - [`api`] - REST + WebSocket surface
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod agent;
pub mod aggregate;
pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod gate;
pub mod intake;
pub mod planner;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use agent::{AgentAdapter, AgentError, AgentOutput, AgentRegistry, AgentTask, ProgressReporter};
pub use config::Config;
pub use domain::{
    AgentKind, AgentResult, ApprovalState, Artifact, ExecutionPlan, Mode, PlanStep, ProjectRecord, ProjectSpec,
    ProjectStatus, ProjectType, Stage, StepStatus,
};
pub use error::{EngineError, EngineResult};
pub use events::{EventKind, ProgressBus, ProgressEvent, ProjectSubscription};
pub use intake::{IntakeRequest, ValidationErrors};
pub use scheduler::{Orchestrator, OrchestratorOptions, ProgressView, StepPolicy, ValidationReport};
pub use state::{RecoveryStats, StateManager};
