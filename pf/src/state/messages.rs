//! State manager messages
//!
//! Commands and responses for the actor pattern.

use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{AgentResult, ApprovalState, ExecutionPlan, ProjectRecord, ProjectStatus};
use crate::events::ProgressEvent;

use super::store::StoreError;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: ProjectStatus, to: ProjectStatus },

    /// A modification closure refused to apply
    #[error("{0}")]
    Rejected(String),
}

impl From<StoreError> for StateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Json(e) => StateError::DeserializationError(e.to_string()),
            other => StateError::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// In-place modification of a project record, run inside the actor
pub type ProjectModifier = Box<dyn FnOnce(&mut ProjectRecord) -> StateResponse<()> + Send>;

/// Outcome of a successful modification
#[derive(Debug, Clone)]
pub struct ProjectUpdate {
    /// Status before the modifier ran
    pub previous_status: ProjectStatus,
    pub record: ProjectRecord,
}

/// Commands sent to the StateManager actor
pub enum StateCommand {
    // Project operations
    CreateProject {
        record: Box<ProjectRecord>,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetProject {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<ProjectRecord>>>,
    },
    ListProjects {
        status_filter: Option<ProjectStatus>,
        reply: oneshot::Sender<StateResponse<Vec<ProjectRecord>>>,
    },
    ModifyProject {
        id: String,
        apply: ProjectModifier,
        reply: oneshot::Sender<StateResponse<ProjectUpdate>>,
    },
    DeleteProject {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Plan operations
    PutPlan {
        project_id: String,
        plan: Box<ExecutionPlan>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetPlan {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<ExecutionPlan>>>,
    },

    // Result operations
    PutResult {
        project_id: String,
        result: Box<AgentResult>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListResults {
        project_id: String,
        reply: oneshot::Sender<StateResponse<Vec<AgentResult>>>,
    },

    // Approval operations
    PutApproval {
        approval: Box<ApprovalState>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListApprovals {
        project_id: String,
        reply: oneshot::Sender<StateResponse<Vec<ApprovalState>>>,
    },

    // Event operations
    AppendEvent {
        event: Box<ProgressEvent>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ListEvents {
        project_id: String,
        limit: usize,
        reply: oneshot::Sender<StateResponse<Vec<ProgressEvent>>>,
    },
    MaxEventSeq {
        project_id: String,
        reply: oneshot::Sender<StateResponse<u64>>,
    },

    /// Shutdown the actor
    Shutdown,
}

impl fmt::Debug for StateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateCommand::CreateProject { .. } => "CreateProject",
            StateCommand::GetProject { .. } => "GetProject",
            StateCommand::ListProjects { .. } => "ListProjects",
            StateCommand::ModifyProject { .. } => "ModifyProject",
            StateCommand::DeleteProject { .. } => "DeleteProject",
            StateCommand::PutPlan { .. } => "PutPlan",
            StateCommand::GetPlan { .. } => "GetPlan",
            StateCommand::PutResult { .. } => "PutResult",
            StateCommand::ListResults { .. } => "ListResults",
            StateCommand::PutApproval { .. } => "PutApproval",
            StateCommand::ListApprovals { .. } => "ListApprovals",
            StateCommand::AppendEvent { .. } => "AppendEvent",
            StateCommand::ListEvents { .. } => "ListEvents",
            StateCommand::MaxEventSeq { .. } => "MaxEventSeq",
            StateCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}
