//! Approval Gate Manager
//!
//! Holds at most one open gate per project. A worker opens a gate and awaits
//! its ticket; `approve`/`reject` resolve it from the API side. Resolving a
//! project that has no open gate is an error, never a silent no-op.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::{ApprovalState, Decision, Stage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("project {0} already has an open approval gate")]
    AlreadyOpen(String),

    #[error("project is not awaiting approval")]
    NotAwaitingApproval,

    #[error("gate {0} is not the project's open gate")]
    StaleGate(String),

    #[error("approval decision must be approved or rejected")]
    InvalidDecision,
}

/// A reviewer's verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub decision: Decision,
    pub feedback: Option<String>,
    pub specific_issues: Vec<String>,
    pub targets: Vec<String>,
}

impl GateDecision {
    pub fn approve(feedback: Option<String>) -> Self {
        Self {
            decision: Decision::Approved,
            feedback,
            specific_issues: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn reject(feedback: Option<String>, specific_issues: Vec<String>, targets: Vec<String>) -> Self {
        Self {
            decision: Decision::Rejected,
            feedback,
            specific_issues,
            targets,
        }
    }
}

/// Worker-side handle of an open gate
#[derive(Debug)]
pub struct GateTicket {
    pub gate_id: String,
    pub stage: Stage,
    rx: oneshot::Receiver<GateDecision>,
}

impl GateTicket {
    /// Wait for the decision; None if the gate was closed without one
    pub async fn wait(self) -> Option<GateDecision> {
        self.rx.await.ok()
    }
}

/// Identifies the gate a decision resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGate {
    pub gate_id: String,
    pub stage: Stage,
}

struct OpenGate {
    gate_id: String,
    stage: Stage,
    tx: oneshot::Sender<GateDecision>,
}

/// Tracks the open gate of every project
#[derive(Default)]
pub struct GateManager {
    open: Mutex<HashMap<String, OpenGate>>,
    opened: AtomicU64,
}

impl GateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn gates(&self) -> std::sync::MutexGuard<'_, HashMap<String, OpenGate>> {
        match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open the gate described by `approval`
    pub fn open(&self, approval: &ApprovalState) -> Result<GateTicket, GateError> {
        debug!(project_id = %approval.project_id, gate_id = %approval.id, stage = %approval.stage, "GateManager::open: called");
        let mut gates = self.gates();
        if gates.contains_key(&approval.project_id) {
            return Err(GateError::AlreadyOpen(approval.project_id.clone()));
        }
        let (tx, rx) = oneshot::channel();
        gates.insert(
            approval.project_id.clone(),
            OpenGate {
                gate_id: approval.id.clone(),
                stage: approval.stage,
                tx,
            },
        );
        self.opened.fetch_add(1, Ordering::SeqCst);
        info!(project_id = %approval.project_id, gate_id = %approval.id, "approval gate opened");
        Ok(GateTicket {
            gate_id: approval.id.clone(),
            stage: approval.stage,
            rx,
        })
    }

    /// Deliver a decision to the project's open gate
    ///
    /// `gate_id`, when given, must name the open gate.
    pub fn resolve(
        &self,
        project_id: &str,
        gate_id: Option<&str>,
        decision: GateDecision,
    ) -> Result<ResolvedGate, GateError> {
        debug!(%project_id, ?gate_id, decision = %decision.decision, "GateManager::resolve: called");
        if decision.decision == Decision::Pending {
            return Err(GateError::InvalidDecision);
        }
        let mut gates = self.gates();
        let open = gates.get(project_id).ok_or(GateError::NotAwaitingApproval)?;
        if let Some(expected) = gate_id
            && expected != open.gate_id
        {
            return Err(GateError::StaleGate(expected.to_string()));
        }
        let open = gates.remove(project_id).ok_or(GateError::NotAwaitingApproval)?;
        let resolved = ResolvedGate {
            gate_id: open.gate_id,
            stage: open.stage,
        };
        if open.tx.send(decision).is_err() {
            // Worker is gone (cancelled); the gate closes all the same
            debug!(%project_id, "GateManager::resolve: waiter dropped");
            return Err(GateError::NotAwaitingApproval);
        }
        info!(%project_id, gate_id = %resolved.gate_id, "approval gate resolved");
        Ok(resolved)
    }

    /// Drop a project's gate without a decision
    pub fn close(&self, project_id: &str) -> bool {
        debug!(%project_id, "GateManager::close: called");
        self.gates().remove(project_id).is_some()
    }

    pub fn is_open(&self, project_id: &str) -> bool {
        self.gates().contains_key(project_id)
    }

    /// Gates opened since start-up
    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}
