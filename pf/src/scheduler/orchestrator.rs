//! Orchestrator - the engine facade
//!
//! Owns the shared engine state (store handle, event bus, approval gates,
//! agent registry) and one worker task per live project. Every external
//! surface (REST, WebSocket, CLI) goes through these operations.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::StepPolicy;
use super::worker::ProjectWorker;
use crate::agent::AgentRegistry;
use crate::config::{Config, IntegrationsConfig};
use crate::domain::{
    AgentKind, AgentResult, ApprovalState, Decision, ExecutionPlan, Integrations, Mode, PlanStep, ProjectRecord,
    ProjectStatus, ProjectType, Stage, StepStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{DEFAULT_CHANNEL_CAPACITY, ProgressBus, ProgressEvent, ProjectSubscription, spawn_event_recorder};
use crate::gate::{GateDecision, GateManager};
use crate::intake::{FieldError, FieldErrorCode, IntakeRequest, ValidationErrors, normalize};
use crate::planner::{StepRenderer, TemplateCatalogue, build_plan};
use crate::state::{RecoveryStats, StateManager, scan_for_recovery};

/// Events returned by `progress`
const RECENT_EVENTS: usize = 50;

/// How often waiters re-read the store between events
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Slack on top of the cancel grace before a worker is abandoned
const JOIN_MARGIN: Duration = Duration::from_secs(1);

/// Everything the orchestrator needs besides the store
#[derive(Clone)]
pub struct OrchestratorOptions {
    pub registry: AgentRegistry,
    pub catalogue: TemplateCatalogue,
    /// Integrations this deployment can service
    pub available: Integrations,
    pub policy: StepPolicy,
    pub channel_capacity: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            registry: AgentRegistry::builtin(),
            catalogue: TemplateCatalogue::builtin(),
            available: IntegrationsConfig::default().available(),
            policy: StepPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        debug!("OrchestratorOptions::from_config: called");
        let catalogue = TemplateCatalogue::load_or_builtin(config.templates.catalogue_path.as_deref())?;
        let registry = AgentRegistry::from_config(&config.agents)?;
        Ok(Self {
            registry,
            catalogue,
            available: config.integrations.available(),
            policy: StepPolicy::from_config(&config.scheduler),
            channel_capacity: config.events.channel_capacity,
        })
    }
}

struct WorkerHandle {
    serial: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// State shared by the orchestrator and its workers
pub(crate) struct Shared {
    pub(crate) state: StateManager,
    pub(crate) bus: Arc<ProgressBus>,
    pub(crate) gates: GateManager,
    pub(crate) registry: AgentRegistry,
    pub(crate) catalogue: TemplateCatalogue,
    pub(crate) available: Integrations,
    pub(crate) policy: StepPolicy,
    pub(crate) renderer: StepRenderer,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    next_worker: AtomicU64,
    transitions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shared {
    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<String, WorkerHandle>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn transition_locks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        match self.transitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn transition_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.transition_locks().entry(project_id.to_string()).or_default())
    }

    /// Validated, serialized lifecycle transition
    ///
    /// The transition event is published before the new status is stored,
    /// so no observer can see a status whose event is missing.
    pub(crate) async fn transition<F>(&self, project_id: &str, next: ProjectStatus, also: F) -> EngineResult<ProjectRecord>
    where
        F: FnOnce(&mut ProjectRecord) + Send + 'static,
    {
        let lock = self.transition_lock(project_id);
        let _guard = lock.lock().await;

        let current = self.state.get_project_required(project_id).await?;
        if !current.status.can_transition_to(next) {
            if current.status.is_terminal() {
                self.transition_locks().remove(project_id);
            }
            return Err(EngineError::InvalidState(format!(
                "project is {} and cannot move to {}",
                current.status, next
            )));
        }
        self.bus.emitter_for(project_id).transition(current.status, next);
        let update = self.state.transition_project(project_id, next, also).await?;
        info!(%project_id, from = %update.previous_status, to = %next, "project transitioned");
        // Terminal states admit no further transitions
        if next.is_terminal() {
            self.transition_locks().remove(project_id);
        }
        Ok(update.record)
    }

    /// Drop the handle of an exiting worker unless a newer worker replaced it
    pub(crate) fn worker_finished(&self, project_id: &str, serial: u64) {
        let mut workers = self.workers();
        if workers.get(project_id).is_some_and(|w| w.serial == serial) {
            workers.remove(project_id);
        }
    }
}

/// Result of a dry-run validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_error: Option<String>,
}

/// Plan outline without the input templates
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub project_type: ProjectType,
    pub mode: Mode,
    pub stages: Vec<Stage>,
    pub steps: Vec<PlanStepSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStepSummary {
    pub id: String,
    pub agent: AgentKind,
    pub stage: Stage,
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<AgentKind>,
}

impl From<&ExecutionPlan> for PlanSummary {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            project_type: plan.project_type,
            mode: plan.mode,
            stages: plan.stages(),
            steps: plan.steps.iter().map(PlanStepSummary::from).collect(),
        }
    }
}

impl From<&PlanStep> for PlanStepSummary {
    fn from(step: &PlanStep) -> Self {
        Self {
            id: step.id.clone(),
            agent: step.agent,
            stage: step.stage,
            depends_on: step.depends_on.iter().cloned().collect(),
            when: step.when.map(|c| c.as_str().to_string()),
            optional: step.optional,
            fallback: step.fallback,
        }
    }
}

/// Per-step line of a progress view
#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub step_id: String,
    pub agent_id: AgentKind,
    pub stage: Stage,
    pub optional: bool,
    /// None until the step has a result
    pub status: Option<StepStatus>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// Snapshot of a project's progress
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub project_id: String,
    pub status: ProjectStatus,
    pub mode: Mode,
    pub current_phase: Option<Stage>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub steps: Vec<StepProgress>,
    pub pending_approval: Option<ApprovalState>,
    pub last_error: Option<String>,
    pub recent_events: Vec<ProgressEvent>,
}

/// Acknowledgement of an approval decision
#[derive(Debug, Clone, Serialize)]
pub struct DecisionAck {
    pub project_id: String,
    pub gate_id: String,
    pub stage: Stage,
    pub decision: Decision,
}

/// Engine facade; cheap to clone
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Build the engine over `state`; spawns the event recorder
    pub fn new(state: StateManager, options: OrchestratorOptions) -> Self {
        debug!(capacity = options.channel_capacity, "Orchestrator::new: called");
        let (recorder, _handle) = spawn_event_recorder(state.clone());
        let bus = Arc::new(ProgressBus::with_recorder(options.channel_capacity, recorder));
        Self {
            shared: Arc::new(Shared {
                state,
                bus,
                gates: GateManager::new(),
                registry: options.registry,
                catalogue: options.catalogue,
                available: options.available,
                policy: options.policy,
                renderer: StepRenderer::new(),
                workers: Mutex::new(HashMap::new()),
                next_worker: AtomicU64::new(1),
                transitions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.shared.state
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.shared.bus
    }

    pub fn gates(&self) -> &GateManager {
        &self.shared.gates
    }

    fn spawn_worker(&self, project_id: &str) {
        let serial = self.shared.next_worker.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let worker = ProjectWorker::new(Arc::clone(&self.shared), project_id.to_string(), serial, cancel.clone());
        // Held across the spawn so a worker that exits at once still finds its handle
        let mut workers = self.shared.workers();
        let join = tokio::spawn(worker.run());
        workers.insert(project_id.to_string(), WorkerHandle { serial, cancel, join });
    }

    /// Projects with a live worker
    pub fn active_workers(&self) -> usize {
        self.shared.workers().values().filter(|w| !w.join.is_finished()).count()
    }

    // === Intake ===

    /// Validate, plan, persist and start a project
    pub async fn create_project(&self, request: IntakeRequest) -> EngineResult<ProjectRecord> {
        debug!(project_name = ?request.project_name, "Orchestrator::create_project: called");
        let spec = normalize(&request)?;
        let plan = build_plan(&spec, &self.shared.catalogue, &self.shared.available)?;

        let mut record = ProjectRecord::new(spec);
        record.plan_id = Some(plan.id.clone());
        let project_id = record.id.clone();
        self.shared.state.create_project(record).await?;
        self.shared.state.put_plan(&project_id, plan).await?;

        let record = self
            .shared
            .transition(&project_id, ProjectStatus::InputReceived, |_| {})
            .await?;
        info!(%project_id, mode = %record.mode(), "project accepted");
        self.spawn_worker(&project_id);
        Ok(record)
    }

    /// Dry run: normalize and plan without creating anything
    pub fn validate(&self, request: &IntakeRequest) -> ValidationReport {
        debug!(project_name = ?request.project_name, "Orchestrator::validate: called");
        match normalize(request) {
            Err(errors) => ValidationReport {
                valid: false,
                errors: errors.details,
                plan: None,
                plan_error: None,
            },
            Ok(spec) => match build_plan(&spec, &self.shared.catalogue, &self.shared.available) {
                Ok(plan) => ValidationReport {
                    valid: true,
                    errors: Vec::new(),
                    plan: Some(PlanSummary::from(&plan)),
                    plan_error: None,
                },
                Err(e) => ValidationReport {
                    valid: false,
                    errors: Vec::new(),
                    plan: None,
                    plan_error: Some(e.to_string()),
                },
            },
        }
    }

    /// Build the plan a request would run, without persisting it
    pub fn plan(&self, request: &IntakeRequest) -> EngineResult<ExecutionPlan> {
        let spec = normalize(request)?;
        Ok(build_plan(&spec, &self.shared.catalogue, &self.shared.available)?)
    }

    // === Queries ===

    pub async fn get_project(&self, project_id: &str) -> EngineResult<ProjectRecord> {
        Ok(self.shared.state.get_project_required(project_id).await?)
    }

    pub async fn list_projects(&self, status: Option<ProjectStatus>) -> EngineResult<Vec<ProjectRecord>> {
        Ok(self.shared.state.list_projects(status).await?)
    }

    pub async fn get_plan(&self, project_id: &str) -> EngineResult<ExecutionPlan> {
        let record = self.get_project(project_id).await?;
        let plan_id = record
            .plan_id
            .ok_or_else(|| EngineError::NotFound(format!("plan for project {}", project_id)))?;
        self.shared
            .state
            .get_plan(&plan_id)
            .await?
            .ok_or(EngineError::NotFound(plan_id))
    }

    pub async fn progress(&self, project_id: &str) -> EngineResult<ProgressView> {
        debug!(%project_id, "Orchestrator::progress: called");
        let record = self.get_project(project_id).await?;
        let plan = match &record.plan_id {
            Some(plan_id) => self.shared.state.get_plan(plan_id).await?,
            None => None,
        };
        let results: HashMap<String, AgentResult> = self
            .shared
            .state
            .list_results(project_id)
            .await?
            .into_iter()
            .map(|r| (r.step_id.clone(), r))
            .collect();

        let steps: Vec<StepProgress> = plan
            .iter()
            .flat_map(|p| p.steps.iter())
            .map(|step| {
                let result = results.get(&step.id);
                StepProgress {
                    step_id: step.id.clone(),
                    agent_id: result.map(|r| r.agent_id).unwrap_or(step.agent),
                    stage: step.stage,
                    optional: step.optional,
                    status: result.map(|r| r.status),
                    attempts: result.map(|r| r.attempts).unwrap_or(0),
                    duration_ms: result.map(|r| r.duration_ms).unwrap_or(0),
                    errors: result.map(|r| r.errors.clone()).unwrap_or_default(),
                }
            })
            .collect();
        let completed_steps = steps
            .iter()
            .filter(|s| s.status.is_some_and(|status| status.is_resolved_ok()))
            .count();

        // A cancelled project keeps its undecided approval as history only
        let pending_approval = if record.is_terminal() {
            None
        } else {
            self.shared.state.pending_approval(project_id).await?
        };

        Ok(ProgressView {
            project_id: record.id.clone(),
            status: record.status,
            mode: record.mode(),
            current_phase: record.current_phase,
            completed_steps,
            total_steps: steps.len(),
            steps,
            pending_approval,
            last_error: record.last_error.clone(),
            recent_events: self.shared.state.list_events(project_id, RECENT_EVENTS).await?,
        })
    }

    /// Live event stream of one project
    pub async fn subscribe(&self, project_id: &str) -> EngineResult<ProjectSubscription> {
        let record = self.get_project(project_id).await?;
        Ok(self
            .shared
            .bus
            .subscribe(project_id, record.status, record.current_phase))
    }

    // === Approval ===

    pub async fn approve(&self, project_id: &str, feedback: Option<String>) -> EngineResult<DecisionAck> {
        debug!(%project_id, "Orchestrator::approve: called");
        let record = self.get_project(project_id).await?;
        if record.status != ProjectStatus::AwaitingApproval {
            return Err(EngineError::not_awaiting_approval());
        }
        let resolved = self
            .shared
            .gates
            .resolve(project_id, None, GateDecision::approve(feedback))?;
        Ok(DecisionAck {
            project_id: project_id.to_string(),
            gate_id: resolved.gate_id,
            stage: resolved.stage,
            decision: Decision::Approved,
        })
    }

    /// Reject the open gate; `targets` narrows which steps re-run
    pub async fn reject(
        &self,
        project_id: &str,
        feedback: Option<String>,
        specific_issues: Vec<String>,
        targets: Vec<String>,
    ) -> EngineResult<DecisionAck> {
        debug!(%project_id, ?targets, "Orchestrator::reject: called");
        let record = self.get_project(project_id).await?;
        if record.status != ProjectStatus::AwaitingApproval {
            return Err(EngineError::not_awaiting_approval());
        }
        let pending = self
            .shared
            .state
            .pending_approval(project_id)
            .await?
            .ok_or_else(EngineError::not_awaiting_approval)?;

        if !targets.is_empty() {
            let plan = self.get_plan(project_id).await?;
            let mut errors = ValidationErrors::default();
            for target in &targets {
                if !plan.steps_in(pending.stage).any(|s| s.matches_target(target)) {
                    errors.push(
                        "targets",
                        FieldErrorCode::InvalidFormat,
                        format!("'{}' does not name a {} step", target, pending.stage),
                    );
                }
            }
            if !errors.is_empty() {
                return Err(errors.into());
            }
        }

        let resolved = self.shared.gates.resolve(
            project_id,
            None,
            GateDecision::reject(feedback, specific_issues, targets),
        )?;
        Ok(DecisionAck {
            project_id: project_id.to_string(),
            gate_id: resolved.gate_id,
            stage: resolved.stage,
            decision: Decision::Rejected,
        })
    }

    // === Cancellation & cleanup ===

    /// Cancel a live project; completed step outputs are kept
    pub async fn cancel(&self, project_id: &str) -> EngineResult<ProjectRecord> {
        debug!(%project_id, "Orchestrator::cancel: called");
        let record = self.get_project(project_id).await?;
        if record.is_terminal() {
            return Err(EngineError::InvalidState(format!("project is already {}", record.status)));
        }
        self.shared
            .transition(project_id, ProjectStatus::Cancelled, |_| {})
            .await?;
        self.shared
            .bus
            .emitter_for(project_id)
            .workflow_completed(ProjectStatus::Cancelled);
        self.shared.gates.close(project_id);

        let handle = self.shared.workers().remove(project_id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let grace = self.shared.policy.cancel_grace + JOIN_MARGIN;
            if tokio::time::timeout(grace, handle.join).await.is_err() {
                warn!(%project_id, "worker did not stop within the cancel grace");
            }
        }
        info!(%project_id, "project cancelled");
        self.get_project(project_id).await
    }

    /// Delete a terminal project and everything stored for it
    pub async fn purge(&self, project_id: &str) -> EngineResult<()> {
        debug!(%project_id, "Orchestrator::purge: called");
        let record = self.get_project(project_id).await?;
        if !record.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "project is {}; only finished projects can be purged",
                record.status
            )));
        }
        self.shared.state.delete_project(project_id).await?;
        self.shared.bus.forget(project_id);
        self.shared.transition_locks().remove(project_id);
        info!(%project_id, "project purged");
        Ok(())
    }

    // === Lifecycle of the engine ===

    /// Resume projects a previous process left unfinished
    pub async fn recover(&self) -> EngineResult<RecoveryStats> {
        debug!("Orchestrator::recover: called");
        let scan = scan_for_recovery(&self.shared.state)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        let mut stats = RecoveryStats::default();

        for record in &scan.stranded {
            let last_seq = self.shared.state.max_event_seq(&record.id).await?;
            self.shared.bus.seed_sequence(&record.id, last_seq);
            let failed = self
                .shared
                .transition(&record.id, ProjectStatus::Failed, |r| {
                    r.last_error = Some("interrupted before planning completed".to_string());
                })
                .await;
            if failed.is_ok() {
                self.shared
                    .bus
                    .emitter_for(record.id.as_str())
                    .workflow_completed(ProjectStatus::Failed);
                stats.failed_pending += 1;
            }
        }

        for record in &scan.resumable {
            let last_seq = self.shared.state.max_event_seq(&record.id).await?;
            self.shared.bus.seed_sequence(&record.id, last_seq);
            if record.status == ProjectStatus::AwaitingApproval {
                stats.gates_reopened += 1;
            }
            self.spawn_worker(&record.id);
            stats.resumed += 1;
        }

        info!(%stats, "recovery complete");
        Ok(stats)
    }

    /// Stop every worker without touching project status
    ///
    /// Interrupted projects stay resumable for the next `recover`.
    pub async fn shutdown(&self) {
        debug!("Orchestrator::shutdown: called");
        let handles: Vec<(String, WorkerHandle)> = self.shared.workers().drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        let grace = self.shared.policy.cancel_grace + JOIN_MARGIN;
        for (project_id, handle) in handles {
            if tokio::time::timeout(grace, handle.join).await.is_err() {
                warn!(%project_id, "worker did not stop before shutdown");
            }
        }
        info!("orchestrator stopped");
    }

    // === Waiting ===

    /// Wait until the project reaches a terminal status
    pub async fn wait_for_terminal(&self, project_id: &str, timeout: Duration) -> EngineResult<ProjectRecord> {
        self.wait_until(project_id, timeout, |r| r.is_terminal()).await
    }

    /// Wait until the project has `status` (or ends)
    pub async fn wait_for_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        timeout: Duration,
    ) -> EngineResult<ProjectRecord> {
        self.wait_until(project_id, timeout, move |r| r.status == status || r.is_terminal())
            .await
    }

    async fn wait_until<P>(&self, project_id: &str, timeout: Duration, done: P) -> EngineResult<ProjectRecord>
    where
        P: Fn(&ProjectRecord) -> bool,
    {
        let mut subscription = self.subscribe(project_id).await?;
        let wait = async {
            loop {
                let record = self.get_project(project_id).await?;
                if done(&record) {
                    return Ok(record);
                }
                tokio::select! {
                    _ = subscription.recv() => {}
                    _ = tokio::time::sleep(WAIT_POLL) => {}
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EngineError::Internal(format!("timed out waiting for project {}", project_id)))?
    }
}
