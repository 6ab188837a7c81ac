//! Progress event vocabulary
//!
//! Every observable lifecycle step of a project becomes a `ProgressEvent`:
//! - Phase lifecycle (started, completed)
//! - Agent activity (started, progress, completed)
//! - Approval gates, workflow completion, errors and transition logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AgentKind, ArtifactType, ProjectStatus, Stage, StepStatus};

/// Immutable, per-project sequenced event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Per-project monotonic sequence number assigned by the bus
    pub seq: u64,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// Type-specific payload; serialized inline with a `type` tag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// First message of every subscription
    Connected {
        status: ProjectStatus,
        #[serde(default)]
        current_phase: Option<Stage>,
    },

    // === Phase lifecycle ===
    PhaseStarted {
        phase: ProjectStatus,
        stage: Stage,
        steps: Vec<String>,
    },
    PhaseCompleted {
        phase: ProjectStatus,
        stage: Stage,
        success: bool,
    },

    // === Agent activity ===
    AgentStarted {
        step_id: String,
        agent_id: AgentKind,
        attempt: u32,
    },
    AgentProgress {
        step_id: String,
        agent_id: AgentKind,
        message: String,
        #[serde(default)]
        percent: Option<u8>,
    },
    AgentCompleted {
        step_id: String,
        agent_id: AgentKind,
        status: StepStatus,
        duration_ms: u64,
        attempts: u32,
    },

    // === Gates & completion ===
    ApprovalRequired {
        gate_id: String,
        stage: Stage,
        artifact_type: ArtifactType,
        artifact_preview: Value,
    },
    WorkflowCompleted {
        status: ProjectStatus,
    },

    // === Errors & logs ===
    Error {
        message: String,
        #[serde(default)]
        agent_id: Option<AgentKind>,
        #[serde(default)]
        step_id: Option<String>,
    },
    Log {
        message: String,
        /// Set for lifecycle transitions
        #[serde(default)]
        from: Option<ProjectStatus>,
        #[serde(default)]
        to: Option<ProjectStatus>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Connected { .. } => "connected",
            EventKind::PhaseStarted { .. } => "phase_started",
            EventKind::PhaseCompleted { .. } => "phase_completed",
            EventKind::AgentStarted { .. } => "agent_started",
            EventKind::AgentProgress { .. } => "agent_progress",
            EventKind::AgentCompleted { .. } => "agent_completed",
            EventKind::ApprovalRequired { .. } => "approval_required",
            EventKind::WorkflowCompleted { .. } => "workflow_completed",
            EventKind::Error { .. } => "error",
            EventKind::Log { .. } => "log",
        }
    }

    /// Whether the event ends the project's stream
    pub fn is_final(&self) -> bool {
        matches!(self, EventKind::WorkflowCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let event = ProgressEvent {
            seq: 7,
            project_id: "p1".to_string(),
            timestamp: Utc::now(),
            kind: EventKind::AgentStarted {
                step_id: "arch-backend".to_string(),
                agent_id: AgentKind::BackendArchitect,
                attempt: 2,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_started");
        assert_eq!(json["project_id"], "p1");
        assert_eq!(json["agent_id"], "backend_architect");
        assert_eq!(json["seq"], 7);

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_approval_required_carries_artifact_fields() {
        let kind = EventKind::ApprovalRequired {
            gate_id: "g1".to_string(),
            stage: Stage::Architecture,
            artifact_type: ArtifactType::ArchitectureDesign,
            artifact_preview: serde_json::json!({"sections": ["architecture"]}),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["artifact_type"], "architecture_design");
        assert!(json["artifact_preview"].is_object());
        assert_eq!(kind.event_type(), "approval_required");
    }
}
