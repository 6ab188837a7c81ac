//! ProjectRecord - the mutable aggregate root of a project
//!
//! Only the scheduler writes a record; everything else reads snapshots through
//! the `StateManager`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::artifact::Artifact;
use super::id::generate_id;
use super::plan::Stage;
use super::spec::{Mode, ProjectSpec};

/// Lifecycle status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Record exists, intake not yet accepted
    #[default]
    Pending,
    /// Spec accepted, plan not yet dispatched
    InputReceived,
    /// Design stages are running
    Designing,
    /// Suspended on an approval gate
    AwaitingApproval,
    /// Execution stage is running
    Executing,
    /// All steps resolved (terminal)
    Completed,
    /// A required step failed (terminal)
    Failed,
    /// Cancelled by the user (terminal)
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::InputReceived => "input_received",
            ProjectStatus::Designing => "designing",
            ProjectStatus::AwaitingApproval => "awaiting_approval",
            ProjectStatus::Executing => "executing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Completed | ProjectStatus::Failed | ProjectStatus::Cancelled
        )
    }

    /// Whether the lifecycle state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, InputReceived)
                | (InputReceived, Designing)
                | (Designing, AwaitingApproval)
                | (Designing, Executing)
                | (AwaitingApproval, Designing)
                | (AwaitingApproval, Executing)
                | (Executing, Completed)
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProjectStatus::Pending),
            "input_received" => Ok(ProjectStatus::InputReceived),
            "designing" => Ok(ProjectStatus::Designing),
            "awaiting_approval" => Ok(ProjectStatus::AwaitingApproval),
            "executing" => Ok(ProjectStatus::Executing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(format!("unknown project status '{}'", other)),
        }
    }
}

/// A project and everything the engine accumulated for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub spec: ProjectSpec,
    pub status: ProjectStatus,

    /// Stage currently running or gated
    #[serde(default)]
    pub current_phase: Option<Stage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Latest execution plan
    #[serde(default)]
    pub plan_id: Option<String>,

    #[serde(default)]
    pub product_design: Option<Artifact>,
    #[serde(default)]
    pub architecture_design: Option<Artifact>,
    #[serde(default)]
    pub outputs: Option<Artifact>,

    /// Human-readable reason for a `failed` status
    #[serde(default)]
    pub last_error: Option<String>,
    /// Step whose failure failed the project
    #[serde(default)]
    pub failed_step: Option<String>,
}

impl ProjectRecord {
    pub fn new(spec: ProjectSpec) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("project", &spec.project_name),
            spec,
            status: ProjectStatus::Pending,
            current_phase: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            plan_id: None,
            product_design: None,
            architecture_design: None,
            outputs: None,
            last_error: None,
            failed_step: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.spec.mode()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Consolidated artifact for a stage, if it has been produced
    pub fn artifact(&self, stage: Stage) -> Option<&Artifact> {
        match stage {
            Stage::ProductDesign => self.product_design.as_ref(),
            Stage::Architecture => self.architecture_design.as_ref(),
            Stage::Execution => self.outputs.as_ref(),
        }
    }

    pub fn set_artifact(&mut self, stage: Stage, artifact: Artifact) {
        match stage {
            Stage::ProductDesign => self.product_design = Some(artifact),
            Stage::Architecture => self.architecture_design = Some(artifact),
            Stage::Execution => self.outputs = Some(artifact),
        }
    }

    /// Apply a status change, stamping timestamps
    ///
    /// Callers validate with `can_transition_to` first; this only records.
    pub fn apply_status(&mut self, status: ProjectStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}
