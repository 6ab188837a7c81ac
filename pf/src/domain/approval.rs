//! ApprovalState - record of one approval gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::id::generate_id;
use super::plan::{ArtifactType, PlanStep, Stage};
use super::record::ProjectStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pending => "pending",
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalState {
    /// Gate id
    pub id: String,
    pub project_id: String,
    pub stage: Stage,
    pub phase: ProjectStatus,
    pub decision: Decision,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub specific_issues: Vec<String>,
    /// Steps a rejection re-queues; empty means the whole stage
    #[serde(default)]
    pub targets: Vec<String>,
    pub artifact_type: ArtifactType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalState {
    /// A fresh pending gate closing `stage`
    pub fn open(project_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: generate_id("gate", stage.as_str()),
            project_id: project_id.into(),
            stage,
            phase: stage.phase(),
            decision: Decision::Pending,
            feedback: None,
            specific_issues: Vec::new(),
            targets: Vec::new(),
            artifact_type: stage.artifact_type(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision == Decision::Pending
    }

    /// Whether a rejection of this gate re-queues `step`
    pub fn targets_step(&self, step: &PlanStep) -> bool {
        if self.decision != Decision::Rejected || step.stage != self.stage {
            return false;
        }
        self.targets.is_empty() || self.targets.iter().any(|t| step.matches_target(t))
    }
}
