//! Agent Adapter
//!
//! The engine never talks to an agent implementation directly. Each dispatch
//! goes through an `AgentAdapter`, selected per `AgentKind` by the
//! `AgentRegistry`:
//!
//! - [`BuiltinAdapter`] - deterministic in-process agents
//! - [`HttpAdapter`] - remote agent service over HTTP
//!
//! Adapters receive the rendered step input plus the aggregated project
//! context, report progress through a [`ProgressReporter`], and must stop
//! promptly once their cancellation token fires.

mod builtin;
mod http;
mod registry;

pub use builtin::BuiltinAdapter;
pub use http::HttpAdapter;
pub use registry::AgentRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::AgentKind;
use crate::events::ProjectEmitter;

/// Errors an agent invocation can end with
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent ran and reported failure
    #[error("agent failed: {0}")]
    Failure(String),

    #[error("agent timed out after {0}ms")]
    Timeout(u64),

    #[error("agent cancelled")]
    Cancelled,

    /// Output was not a JSON object
    #[error("invalid agent output: {0}")]
    InvalidOutput(String),

    /// Adapter could not be set up or reached
    #[error("agent configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentError::Cancelled | AgentError::Config(_))
    }
}

/// One agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub project_id: String,
    pub step_id: String,
    pub agent: AgentKind,
    /// 1-based attempt number for this agent
    pub attempt: u32,
    /// Rendered step input
    pub input: String,
    /// Spec, prior artifacts, upstream outputs and any reviewer feedback
    pub context: Value,
}

/// Successful invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Structured output; must be a JSON object
    pub output: Value,
    /// Non-fatal issues; a non-empty list makes the step a `warning`
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl AgentOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Lets an adapter publish `agent_progress` events for its step
#[derive(Clone)]
pub struct ProgressReporter {
    emitter: Option<ProjectEmitter>,
    step_id: String,
    agent: AgentKind,
}

impl ProgressReporter {
    pub fn new(emitter: ProjectEmitter, step_id: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            emitter: Some(emitter),
            step_id: step_id.into(),
            agent,
        }
    }

    /// Reporter that drops everything
    pub fn noop(agent: AgentKind) -> Self {
        Self {
            emitter: None,
            step_id: String::new(),
            agent,
        }
    }

    pub fn report(&self, message: &str, percent: Option<u8>) {
        debug!(step_id = %self.step_id, agent = %self.agent, %message, "ProgressReporter::report: called");
        if let Some(emitter) = &self.emitter {
            emitter.agent_progress(&self.step_id, self.agent, message, percent.map(|p| p.min(100)));
        }
    }
}

/// An agent implementation the scheduler can dispatch to
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Short adapter name for logs
    fn name(&self) -> &'static str;

    /// Run one attempt of a step
    ///
    /// Implementations should return `AgentError::Cancelled` soon after
    /// `cancel` fires; the scheduler abandons them after a grace period.
    async fn invoke(
        &self,
        task: AgentTask,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AgentError::Failure("x".into()).is_retryable());
        assert!(AgentError::Timeout(10).is_retryable());
        assert!(AgentError::InvalidOutput("x".into()).is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
        assert!(!AgentError::Config("x".into()).is_retryable());
    }

    #[test]
    fn test_noop_reporter_is_silent() {
        ProgressReporter::noop(AgentKind::CodeGenerator).report("working", Some(150));
    }
}
