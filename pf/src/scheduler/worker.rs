//! Per-project worker - the lifecycle state machine
//!
//! One worker drives one project through its plan stage by stage. Steps
//! inside a stage fan out as concurrent tasks; the worker suspends on the
//! group barrier, consolidates, and (in discovery mode) parks on an approval
//! gate. Every decision the worker takes is derived from the store (results
//! and approvals), so a restarted worker resumes where the last one stopped.

use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{feedback_for, rejection_targets, step_context, steps_to_run};
use super::orchestrator::Shared;
use super::runner::{CANCELLED_REASON, StepRun, run_step};
use crate::aggregate::{GroupFailure, consolidate, evaluate_group};
use crate::domain::{
    AgentKind, AgentResult, ApprovalState, Decision, ExecutionPlan, PlanStep, ProjectRecord, ProjectStatus, Stage,
    StepStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventKind, ProjectEmitter};
use crate::planner::ready_steps;

/// Whether the worker keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct ProjectWorker {
    shared: Arc<Shared>,
    project_id: String,
    serial: u64,
    emitter: ProjectEmitter,
    cancel: CancellationToken,
}

impl ProjectWorker {
    pub(crate) fn new(shared: Arc<Shared>, project_id: String, serial: u64, cancel: CancellationToken) -> Self {
        let emitter = shared.bus.emitter_for(project_id.clone());
        Self {
            shared,
            project_id,
            serial,
            emitter,
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        info!(project_id = %self.project_id, "worker started");
        if let Err(e) = self.drive().await {
            error!(project_id = %self.project_id, error = %e, "worker stopped on error");
            if !self.cancel.is_cancelled() {
                let message = format!("internal error: {}", e);
                self.emitter.error(&message, None, None);
                self.fail(None, message).await;
            }
        }
        self.shared.worker_finished(&self.project_id, self.serial);
        info!(project_id = %self.project_id, "worker finished");
    }

    async fn drive(&self) -> EngineResult<()> {
        let record = self.shared.state.get_project_required(&self.project_id).await?;
        if record.is_terminal() {
            return Ok(());
        }
        let plan_id = record
            .plan_id
            .clone()
            .ok_or_else(|| EngineError::Internal(format!("project {} has no plan", self.project_id)))?;
        let plan = self
            .shared
            .state
            .get_plan(&plan_id)
            .await?
            .ok_or_else(|| EngineError::Internal(format!("plan {} not found", plan_id)))?;

        for stage in plan.stages() {
            if self.run_stage(&plan, stage).await? == Flow::Stop {
                return Ok(());
            }
        }
        self.complete().await
    }

    // === Stages ===

    async fn run_stage(&self, plan: &ExecutionPlan, stage: Stage) -> EngineResult<Flow> {
        debug!(project_id = %self.project_id, %stage, "ProjectWorker::run_stage: called");
        let stage_steps: Vec<&PlanStep> = plan.steps_in(stage).collect();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Stop);
            }
            let gate = match self.latest_approval(stage).await? {
                Some(approval) if approval.decision == Decision::Approved => return Ok(Flow::Continue),
                Some(approval) if approval.is_pending() => approval,
                rejection => {
                    if self.execute_stage(plan, stage, &stage_steps, rejection.as_ref()).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                    if !plan.requires_approval(stage) {
                        return Ok(Flow::Continue);
                    }
                    let approval = ApprovalState::open(&self.project_id, stage);
                    self.shared.state.put_approval(approval.clone()).await?;
                    approval
                }
            };
            if self.await_gate(gate).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
    }

    async fn latest_approval(&self, stage: Stage) -> EngineResult<Option<ApprovalState>> {
        Ok(self
            .shared
            .state
            .list_approvals(&self.project_id)
            .await?
            .into_iter()
            .rev()
            .find(|a| a.stage == stage))
    }

    async fn results(&self) -> EngineResult<HashMap<String, AgentResult>> {
        Ok(self
            .shared
            .state
            .list_results(&self.project_id)
            .await?
            .into_iter()
            .map(|r| (r.step_id.clone(), r))
            .collect())
    }

    /// Run whatever the stage still needs, then consolidate it
    async fn execute_stage(
        &self,
        plan: &ExecutionPlan,
        stage: Stage,
        stage_steps: &[&PlanStep],
        rejection: Option<&ApprovalState>,
    ) -> EngineResult<Flow> {
        let mut results = self.results().await?;
        let to_run = steps_to_run(stage_steps, &results, rejection);

        if to_run.is_empty() && rejection.is_none() {
            let record = self.shared.state.get_project_required(&self.project_id).await?;
            if record.artifact(stage).is_some() {
                debug!(project_id = %self.project_id, %stage, "ProjectWorker::execute_stage: already consolidated");
                return Ok(Flow::Continue);
            }
        }

        let Some(mut record) = self.enter_phase(stage).await? else {
            return Ok(Flow::Stop);
        };
        self.emitter
            .phase_started(stage, to_run.iter().map(|s| s.id.clone()).collect());

        let requeued: HashSet<&str> = rejection
            .map(|r| rejection_targets(stage_steps, r))
            .unwrap_or_default();
        let run_ids: HashSet<&str> = to_run.iter().map(|s| s.id.as_str()).collect();
        let mut resolved: HashSet<String> = plan
            .steps
            .iter()
            .filter(|s| !run_ids.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();
        let mut started: HashSet<String> = HashSet::new();
        let mut failure: Option<AgentResult> = None;

        let group_cancel = self.cancel.child_token();
        let mut tasks: JoinSet<(String, AgentKind, Option<AgentResult>)> = JoinSet::new();

        loop {
            if failure.is_none() && !group_cancel.is_cancelled() {
                // Keep dispatching until nothing new becomes ready; skips can unlock dependents
                loop {
                    let ready: Vec<&PlanStep> = ready_steps(to_run.iter().copied(), &resolved, &started);
                    if ready.is_empty() || failure.is_some() {
                        break;
                    }
                    for step in ready {
                        started.insert(step.id.clone());

                        if !step.is_enabled(&record.spec.integrations) {
                            let reason = step
                                .when
                                .map(|c| format!("condition {} is false", c.as_str()))
                                .unwrap_or_else(|| "disabled".to_string());
                            let result = AgentResult::skipped(&step.id, step.agent, reason);
                            self.record_result(result, &mut results).await?;
                            resolved.insert(step.id.clone());
                            continue;
                        }

                        let feedback = rejection
                            .filter(|_| requeued.contains(step.id.as_str()))
                            .map(|r| feedback_for(r, results.get(&step.id)));
                        let context = step_context(&record, plan, &results, feedback);
                        let input = match self.shared.renderer.render(&step.input, &context) {
                            Ok(input) => input,
                            Err(e) => {
                                let mut result = AgentResult::skipped(&step.id, step.agent, "");
                                result.status = StepStatus::Failure;
                                result.errors = vec![format!("input template failed to render: {}", e)];
                                self.record_result(result.clone(), &mut results).await?;
                                if step.optional {
                                    resolved.insert(step.id.clone());
                                } else {
                                    failure = Some(result);
                                    group_cancel.cancel();
                                    break;
                                }
                                continue;
                            }
                        };

                        debug!(project_id = %self.project_id, step_id = %step.id, "ProjectWorker::execute_stage: dispatching");
                        let run = StepRun {
                            project_id: self.project_id.clone(),
                            step: (*step).clone(),
                            input,
                            context,
                            emitter: self.emitter.clone(),
                            registry: self.shared.registry.clone(),
                            policy: self.shared.policy.clone(),
                            cancel: group_cancel.clone(),
                        };
                        let step_id = step.id.clone();
                        let agent = step.agent;
                        tasks.spawn(async move {
                            let result = AssertUnwindSafe(run_step(run)).catch_unwind().await.ok();
                            (step_id, agent, result)
                        });
                    }
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (step_id, agent, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(project_id = %self.project_id, error = %e, "ProjectWorker::execute_stage: step task lost");
                    continue;
                }
            };
            let result = result.unwrap_or_else(|| {
                let mut lost = AgentResult::skipped(&step_id, agent, "");
                lost.status = StepStatus::Failure;
                lost.errors = vec!["step runner panicked".to_string()];
                lost
            });
            let optional = plan.step(&step_id).is_some_and(|s| s.optional);

            if self.is_cancellation(&result) && !self.project_cancelled().await? {
                // Shutdown, not a user cancel: leave the step to be re-run on recovery
                debug!(project_id = %self.project_id, %step_id, "ProjectWorker::execute_stage: dropping interrupted result");
                continue;
            }
            self.record_result(result.clone(), &mut results).await?;

            if result.status.is_resolved_ok() || optional {
                resolved.insert(step_id);
            } else if failure.is_none() {
                warn!(project_id = %self.project_id, %step_id, "required step failed, cancelling siblings");
                failure = Some(result);
                group_cancel.cancel();
            }
        }

        if let Some(failed) = failure {
            let failure = GroupFailure {
                step_id: failed.step_id.clone(),
                agent_id: failed.agent_id,
                errors: failed.errors.clone(),
            };
            self.fail_stage(stage, &failure).await;
            return Ok(Flow::Stop);
        }
        if self.cancel.is_cancelled() {
            return Ok(Flow::Stop);
        }
        if let Err(failure) = evaluate_group(stage_steps.iter().copied(), &results) {
            self.fail_stage(stage, &failure).await;
            return Ok(Flow::Stop);
        }

        let artifact = consolidate(stage, stage_steps.iter().copied(), &results);
        for conflict in artifact.annotations.iter().filter(|a| a.axis.is_some()) {
            self.emitter.log(&conflict.message);
        }
        record = self
            .shared
            .state
            .modify_project(&self.project_id, move |record| {
                record.set_artifact(stage, artifact);
                Ok(())
            })
            .await?
            .record;
        debug!(project_id = %self.project_id, %stage, sources = ?record.artifact(stage).map(|a| a.sources.len()), "stage consolidated");
        self.emitter.phase_completed(stage, true);
        Ok(Flow::Continue)
    }

    fn is_cancellation(&self, result: &AgentResult) -> bool {
        self.cancel.is_cancelled()
            && result.status == StepStatus::Skipped
            && result.errors.iter().any(|e| e == CANCELLED_REASON)
    }

    async fn project_cancelled(&self) -> EngineResult<bool> {
        let record = self.shared.state.get_project_required(&self.project_id).await?;
        Ok(record.status == ProjectStatus::Cancelled)
    }

    async fn record_result(&self, result: AgentResult, results: &mut HashMap<String, AgentResult>) -> EngineResult<()> {
        self.shared.state.put_result(&self.project_id, result.clone()).await?;
        self.emitter.agent_completed(
            &result.step_id,
            result.agent_id,
            result.status,
            result.duration_ms,
            result.attempts,
        );
        results.insert(result.step_id.clone(), result);
        Ok(())
    }

    // === Lifecycle ===

    /// Move into the stage's phase; None once the project is terminal
    async fn enter_phase(&self, stage: Stage) -> EngineResult<Option<ProjectRecord>> {
        let phase = stage.phase();
        let record = self.shared.state.get_project_required(&self.project_id).await?;
        if record.is_terminal() {
            return Ok(None);
        }
        if record.status == phase {
            let update = self
                .shared
                .state
                .modify_project(&self.project_id, move |r| {
                    r.current_phase = Some(stage);
                    Ok(())
                })
                .await?;
            return Ok(Some(update.record));
        }
        if record.status == ProjectStatus::InputReceived && phase == ProjectStatus::Executing {
            if self.step_to(ProjectStatus::Designing, Some(stage)).await?.is_none() {
                return Ok(None);
            }
        }
        self.step_to(phase, Some(stage)).await
    }

    /// Transition, treating a concurrently terminated project as a stop
    async fn step_to(&self, next: ProjectStatus, stage: Option<Stage>) -> EngineResult<Option<ProjectRecord>> {
        let result = self
            .shared
            .transition(&self.project_id, next, move |r| {
                if stage.is_some() {
                    r.current_phase = stage;
                }
            })
            .await;
        match result {
            Ok(record) => Ok(Some(record)),
            Err(EngineError::InvalidState(reason)) => {
                debug!(project_id = %self.project_id, %reason, "ProjectWorker::step_to: transition refused");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn await_gate(&self, approval: ApprovalState) -> EngineResult<Flow> {
        let stage = approval.stage;
        let ticket = self.shared.gates.open(&approval)?;

        let record = self.shared.state.get_project_required(&self.project_id).await?;
        let record = if record.status == ProjectStatus::AwaitingApproval {
            record
        } else {
            match self.step_to(ProjectStatus::AwaitingApproval, Some(stage)).await? {
                Some(record) => record,
                None => {
                    self.shared.gates.close(&self.project_id);
                    return Ok(Flow::Stop);
                }
            }
        };

        let artifact_preview = record
            .artifact(stage)
            .map(|a| a.preview())
            .unwrap_or(serde_json::Value::Null);
        self.emitter.emit(EventKind::ApprovalRequired {
            gate_id: approval.id.clone(),
            stage,
            artifact_type: approval.artifact_type,
            artifact_preview,
        });

        let decision = tokio::select! {
            decision = ticket.wait() => decision,
            _ = self.cancel.cancelled() => None,
        };
        let Some(decision) = decision else {
            self.shared.gates.close(&self.project_id);
            return Ok(Flow::Stop);
        };

        let mut resolved = approval;
        resolved.decision = decision.decision;
        resolved.feedback = decision.feedback;
        resolved.specific_issues = decision.specific_issues;
        resolved.targets = decision.targets;
        resolved.resolved_at = Some(chrono::Utc::now());
        self.shared.state.put_approval(resolved.clone()).await?;
        info!(project_id = %self.project_id, %stage, decision = %resolved.decision, "approval gate decided");

        match resolved.decision {
            Decision::Rejected => {
                self.emitter.log(&format!("{} rejected, re-running affected steps", stage));
                if self.step_to(ProjectStatus::Designing, Some(stage)).await?.is_none() {
                    return Ok(Flow::Stop);
                }
            }
            Decision::Approved | Decision::Pending => {
                self.emitter.log(&format!("{} approved", stage));
            }
        }
        Ok(Flow::Continue)
    }

    async fn complete(&self) -> EngineResult<()> {
        let record = self.shared.state.get_project_required(&self.project_id).await?;
        if record.is_terminal() {
            return Ok(());
        }
        if record.status != ProjectStatus::Executing && self.enter_phase(Stage::Execution).await?.is_none() {
            return Ok(());
        }
        if self.step_to(ProjectStatus::Completed, None).await?.is_some() {
            self.emitter.workflow_completed(ProjectStatus::Completed);
            info!(project_id = %self.project_id, "project completed");
        }
        Ok(())
    }

    async fn fail_stage(&self, stage: Stage, failure: &GroupFailure) {
        let message = failure.message();
        self.emitter
            .error(&message, Some(failure.agent_id), Some(&failure.step_id));
        self.emitter.phase_completed(stage, false);
        self.fail(Some(failure.step_id.clone()), message).await;
    }

    async fn fail(&self, failed_step: Option<String>, message: String) {
        let result = self
            .shared
            .transition(&self.project_id, ProjectStatus::Failed, move |r| {
                r.last_error = Some(message);
                r.failed_step = failed_step;
            })
            .await;
        match result {
            Ok(_) => {
                self.emitter.workflow_completed(ProjectStatus::Failed);
                warn!(project_id = %self.project_id, "project failed");
            }
            Err(e) => debug!(project_id = %self.project_id, error = %e, "ProjectWorker::fail: not failed"),
        }
    }
}
