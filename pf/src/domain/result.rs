//! AgentResult - outcome of one step execution
//!
//! One result per (project, step). A retry replaces the earlier result rather
//! than appending to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::agent::AgentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    /// Succeeded with non-fatal remarks
    Warning,
    /// Not dispatched (predicate false) or abandoned on cancellation
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Warning => "warning",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether dependents may proceed past a step with this status
    pub fn is_resolved_ok(&self) -> bool {
        !matches!(self, StepStatus::Failure)
    }

    /// Whether the step produced output worth merging
    pub fn has_output(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Warning)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub step_id: String,
    pub agent_id: AgentKind,
    pub status: StepStatus,
    /// Agent output, always a JSON object (or null when none was produced)
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl AgentResult {
    /// Result for a step that was never dispatched
    pub fn skipped(step_id: impl Into<String>, agent_id: AgentKind, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            agent_id,
            status: StepStatus::Skipped,
            output: Value::Null,
            errors: vec![reason.into()],
            duration_ms: 0,
            attempts: 0,
            started_at: now,
            completed_at: now,
        }
    }
}
