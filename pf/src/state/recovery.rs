//! Crash recovery
//!
//! Finds projects a previous process left mid-flight so the orchestrator can
//! resume them from their persisted results and approvals.

use tracing::{debug, info};

use crate::domain::{ProjectRecord, ProjectStatus};

use super::StateManager;

/// Recovery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Projects whose workers were restarted
    pub resumed: usize,
    /// Projects that never got past intake and were failed
    pub failed_pending: usize,
    /// Approval gates re-opened for resumed projects
    pub gates_reopened: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resumed: {}, failed pending: {}, gates reopened: {}",
            self.resumed, self.failed_pending, self.gates_reopened
        )
    }
}

/// Non-terminal projects found in the store
#[derive(Debug, Default)]
pub struct RecoveryScan {
    /// Projects with a stored plan that can continue
    pub resumable: Vec<ProjectRecord>,
    /// Projects persisted before their plan was accepted
    pub stranded: Vec<ProjectRecord>,
}

impl RecoveryScan {
    pub fn awaiting_approval(&self) -> usize {
        self.resumable
            .iter()
            .filter(|p| p.status == ProjectStatus::AwaitingApproval)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.resumable.is_empty() && self.stranded.is_empty()
    }
}

/// Scan the store for incomplete projects
pub async fn scan_for_recovery(state: &StateManager) -> eyre::Result<RecoveryScan> {
    let mut scan = RecoveryScan::default();

    let projects = state
        .list_projects(None)
        .await
        .map_err(|e| eyre::eyre!("Failed to list projects: {}", e))?;

    for project in projects.into_iter().filter(|p| !p.is_terminal()) {
        if project.status == ProjectStatus::Pending || project.plan_id.is_none() {
            debug!(project_id = %project.id, "Found project stranded before planning");
            scan.stranded.push(project);
        } else {
            debug!(project_id = %project.id, status = %project.status, "Found project needing recovery");
            scan.resumable.push(project);
        }
    }

    // Oldest first so recovered work keeps submission order
    scan.resumable.reverse();
    scan.stranded.reverse();

    info!(
        resumable = scan.resumable.len(),
        stranded = scan.stranded.len(),
        "scan_for_recovery: complete"
    );
    Ok(scan)
}
