//! Shared harness for the integration tests
//!
//! Builds an Orchestrator over an in-memory (or on-disk) store with a
//! scripted agent adapter, so scenarios run without any network access.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use projectforge::agent::{AgentAdapter, AgentError, AgentOutput, AgentRegistry, AgentTask, BuiltinAdapter, ProgressReporter};
use projectforge::domain::{ApprovalState, Decision, ProjectRecord, ProjectStatus, Stage};
use projectforge::events::ProgressEvent;
use projectforge::intake::IntakeRequest;
use projectforge::scheduler::{Orchestrator, OrchestratorOptions, StepPolicy};
use projectforge::state::StateManager;

pub const WAIT: Duration = Duration::from_secs(15);

/// What a scripted step does on every attempt
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Builtin output after a short delay
    Builtin(Duration),
    Output(Value),
    Fail(String),
    /// Ignore the step timeout and sleep
    Hang(Duration),
}

/// Adapter that follows a per-step script and records concurrency
pub struct ScriptedAdapter {
    behaviours: HashMap<String, Behaviour>,
    builtin: BuiltinAdapter,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            behaviours: HashMap::new(),
            builtin: BuiltinAdapter::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, step_id: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(step_id.to_string(), behaviour);
        self
    }

    /// Every step succeeds with builtin output after `delay`
    pub fn slow(delay: Duration) -> Self {
        let mut adapter = Self::new();
        adapter.behaviours.insert("*".to_string(), Behaviour::Builtin(delay));
        adapter
    }

    pub fn calls_for(&self, step_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|id| *id == step_id).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn invoke(
        &self,
        task: AgentTask,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        self.calls.lock().unwrap().push(task.step_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behaviour = self
            .behaviours
            .get(&task.step_id)
            .or_else(|| self.behaviours.get("*"))
            .cloned()
            .unwrap_or(Behaviour::Builtin(Duration::ZERO));
        match behaviour {
            Behaviour::Builtin(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => self.builtin.invoke(task, progress, cancel).await,
                    _ = cancel.cancelled() => Err(AgentError::Cancelled),
                }
            }
            Behaviour::Output(output) => Ok(AgentOutput::new(output)),
            Behaviour::Fail(message) => Err(AgentError::Failure(message)),
            Behaviour::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(AgentOutput::new(json!({})))
            }
        }
    }
}

pub fn fast_policy() -> StepPolicy {
    StepPolicy {
        step_timeout: Duration::from_millis(500),
        max_attempts: 2,
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(10),
        cancel_grace: Duration::from_millis(200),
    }
}

pub fn engine_on(state: StateManager, adapter: Arc<ScriptedAdapter>) -> Orchestrator {
    Orchestrator::new(
        state,
        OrchestratorOptions {
            registry: AgentRegistry::new(adapter),
            policy: fast_policy(),
            ..Default::default()
        },
    )
}

pub fn engine(adapter: ScriptedAdapter) -> (Orchestrator, Arc<ScriptedAdapter>) {
    let adapter = Arc::new(adapter);
    let state = StateManager::spawn_in_memory().unwrap();
    (engine_on(state, Arc::clone(&adapter)), adapter)
}

pub fn engine_at(path: &Path, adapter: ScriptedAdapter) -> (Orchestrator, Arc<ScriptedAdapter>, StateManager) {
    let adapter = Arc::new(adapter);
    let state = StateManager::spawn(path).unwrap();
    (engine_on(state.clone(), Arc::clone(&adapter)), adapter, state)
}

pub fn discovery(overview: &str) -> IntakeRequest {
    IntakeRequest::discovery("team-tasks", overview)
}

pub fn direct(project_type: &str, language: &str) -> IntakeRequest {
    IntakeRequest::direct("inventory-service", project_type, language)
}

/// Wait until the `opened`-th gate is up at `stage`
pub async fn await_gate(orchestrator: &Orchestrator, project_id: &str, stage: Stage, opened: u64) -> ProjectRecord {
    tokio::time::timeout(WAIT, async {
        loop {
            let record = orchestrator.get_project(project_id).await.unwrap();
            assert!(
                !record.is_terminal(),
                "project ended {} while waiting for the {} gate",
                record.status,
                stage
            );
            if orchestrator.gates().opened_count() >= opened
                && record.status == ProjectStatus::AwaitingApproval
                && record.current_phase == Some(stage)
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gate did not open in time")
}

pub async fn pending_approvals(orchestrator: &Orchestrator, project_id: &str) -> Vec<ApprovalState> {
    orchestrator
        .state()
        .list_approvals(project_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.decision == Decision::Pending)
        .collect()
}

/// Every event of the project until (and including) `workflow_completed`
pub async fn collect_until_final(orchestrator: &Orchestrator, project_id: &str) -> Vec<ProgressEvent> {
    let mut subscription = orchestrator.subscribe(project_id).await.unwrap();
    let mut events = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(event) = subscription.recv().await {
            let last = event.kind.is_final();
            events.push(event);
            if last {
                break;
            }
        }
    })
    .await
    .expect("project did not finish in time");
    events
}

/// The project's recorded event log, once `workflow_completed` has been written
pub async fn recorded_events(orchestrator: &Orchestrator, project_id: &str) -> Vec<ProgressEvent> {
    tokio::time::timeout(WAIT, async {
        loop {
            let events = orchestrator.state().list_events(project_id, 10_000).await.unwrap();
            if events.last().is_some_and(|e| e.kind.is_final()) {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event log never recorded workflow_completed")
}
