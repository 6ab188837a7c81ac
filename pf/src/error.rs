//! Engine error taxonomy
//!
//! Every Orchestrator operation fails with an `EngineError`; the HTTP layer
//! maps each variant onto a status code and error envelope.

use thiserror::Error;

use crate::gate::GateError;
use crate::intake::ValidationErrors;
use crate::planner::PlanBuildError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing input; never retried
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Operation not valid for the project's current lifecycle state
    #[error("{0}")]
    InvalidState(String),

    #[error("project not found: {0}")]
    NotFound(String),

    /// Template or configuration gap; raised before any project exists
    #[error(transparent)]
    PlanBuild(#[from] PlanBuildError),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::NotFound(_) => "not_found",
            EngineError::PlanBuild(_) => "plan_build_error",
            EngineError::Store(_) | EngineError::Internal(_) => "internal_error",
        }
    }

    pub fn not_awaiting_approval() -> Self {
        EngineError::InvalidState("project is not awaiting approval".to_string())
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(id) => EngineError::NotFound(id),
            StateError::InvalidTransition { from, to } => {
                EngineError::InvalidState(format!("project is {} and cannot move to {}", from, to))
            }
            StateError::Rejected(message) => EngineError::InvalidState(message),
            other => EngineError::Store(other.to_string()),
        }
    }
}

impl From<GateError> for EngineError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NotAwaitingApproval => EngineError::not_awaiting_approval(),
            other => EngineError::InvalidState(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
