//! Step runner
//!
//! Runs one plan step to a final `AgentResult`: every attempt is bounded by a
//! timeout, failures are retried with backoff, a fallback agent gets its own
//! budget once the primary is exhausted, and cancellation gives the agent a
//! grace period before it is abandoned and the step recorded as skipped.

use chrono::Utc;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::StepPolicy;
use crate::agent::{AgentAdapter, AgentError, AgentOutput, AgentRegistry, AgentTask, ProgressReporter};
use crate::domain::{AgentKind, AgentResult, PlanStep, StepStatus};
use crate::events::ProjectEmitter;

/// Reason recorded on steps abandoned by cancellation
pub const CANCELLED_REASON: &str = "cancelled";

/// Everything needed to run one step
pub struct StepRun {
    pub project_id: String,
    pub step: PlanStep,
    /// Rendered input
    pub input: String,
    pub context: Value,
    pub emitter: ProjectEmitter,
    pub registry: AgentRegistry,
    pub policy: StepPolicy,
    pub cancel: CancellationToken,
}

enum Attempt {
    Done(AgentOutput),
    Cancelled,
    Failed(AgentError),
}

/// Run a step until it succeeds, exhausts its budget, or is cancelled
pub async fn run_step(run: StepRun) -> AgentResult {
    let StepRun {
        project_id,
        step,
        input,
        context,
        emitter,
        registry,
        policy,
        cancel,
    } = run;
    debug!(%project_id, step_id = %step.id, agent = %step.agent, "run_step: called");

    let started_at = Utc::now();
    let clock = Instant::now();
    let mut attempts = 0u32;
    let mut errors = Vec::new();
    let mut last_agent = step.agent;

    let agents: Vec<AgentKind> = std::iter::once(step.agent).chain(step.fallback).collect();

    for agent in agents {
        last_agent = agent;
        let adapter = registry.adapter(agent);
        let timeout = registry.timeout_for(agent, policy.step_timeout);
        if agent != step.agent {
            info!(%project_id, step_id = %step.id, fallback = %agent, "run_step: switching to fallback agent");
            emitter.log(&format!("step {} falling back to {}", step.id, agent));
        }

        for attempt in 1..=policy.max_attempts {
            if cancel.is_cancelled() {
                return cancelled(&step, agent, attempts, started_at);
            }
            attempts += 1;
            emitter.agent_started(&step.id, agent, attempt);

            let task = AgentTask {
                project_id: project_id.clone(),
                step_id: step.id.clone(),
                agent,
                attempt,
                input: input.clone(),
                context: context.clone(),
            };
            let progress = ProgressReporter::new(emitter.clone(), step.id.clone(), agent);

            match invoke_once(adapter.as_ref(), task, progress, &cancel, timeout, policy.cancel_grace).await {
                Attempt::Done(out) => {
                    let status = if out.warnings.is_empty() {
                        StepStatus::Success
                    } else {
                        StepStatus::Warning
                    };
                    return AgentResult {
                        step_id: step.id.clone(),
                        agent_id: agent,
                        status,
                        output: out.output,
                        errors: out.warnings,
                        duration_ms: clock.elapsed().as_millis() as u64,
                        attempts,
                        started_at,
                        completed_at: Utc::now(),
                    };
                }
                Attempt::Cancelled => return cancelled(&step, agent, attempts, started_at),
                Attempt::Failed(e) => {
                    warn!(%project_id, step_id = %step.id, %agent, attempt, error = %e, "run_step: attempt failed");
                    errors.push(format!("{} attempt {}: {}", agent, attempt, e));
                    if !e.is_retryable() {
                        break;
                    }
                    if attempt < policy.max_attempts {
                        let delay = policy.backoff(attempt);
                        debug!(step_id = %step.id, delay_ms = delay.as_millis() as u64, "run_step: backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return cancelled(&step, agent, attempts, started_at),
                        }
                    }
                }
            }
        }
    }

    AgentResult {
        step_id: step.id.clone(),
        agent_id: last_agent,
        status: StepStatus::Failure,
        output: Value::Null,
        errors,
        duration_ms: clock.elapsed().as_millis() as u64,
        attempts,
        started_at,
        completed_at: Utc::now(),
    }
}

fn cancelled(step: &PlanStep, agent: AgentKind, attempts: u32, started_at: chrono::DateTime<Utc>) -> AgentResult {
    let mut result = AgentResult::skipped(&step.id, agent, CANCELLED_REASON);
    result.attempts = attempts;
    result.started_at = started_at;
    result
}

/// One bounded attempt
async fn invoke_once(
    adapter: &dyn AgentAdapter,
    task: AgentTask,
    progress: ProgressReporter,
    cancel: &CancellationToken,
    timeout: Duration,
    grace: Duration,
) -> Attempt {
    let agent_token = cancel.child_token();
    let invocation = adapter.invoke(task, progress, agent_token.clone());
    tokio::pin!(invocation);

    let raced = tokio::select! {
        result = tokio::time::timeout(timeout, &mut invocation) => Some(result),
        _ = cancel.cancelled() => None,
    };

    let outcome = match raced {
        Some(Ok(result)) => result,
        Some(Err(_)) => {
            agent_token.cancel();
            Err(AgentError::Timeout(timeout.as_millis() as u64))
        }
        None => match tokio::time::timeout(grace, &mut invocation).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(_)) => return Attempt::Cancelled,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "invoke_once: agent ignored cancellation, abandoning");
                return Attempt::Cancelled;
            }
        },
    };

    match outcome {
        Ok(out) if out.output.is_object() => Attempt::Done(out),
        Ok(out) => Attempt::Failed(AgentError::InvalidOutput(format!(
            "expected a JSON object, got {}",
            json_kind(&out.output)
        ))),
        Err(AgentError::Cancelled) if cancel.is_cancelled() => Attempt::Cancelled,
        Err(e) => Attempt::Failed(e),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::{MockAdapter, Scripted};
    use serde_json::json;
    use std::sync::Arc;

    fn test_run(step: PlanStep, adapter: Arc<dyn AgentAdapter>, policy: StepPolicy) -> StepRun {
        let bus = Arc::new(crate::events::ProgressBus::new(64));
        StepRun {
            project_id: "p1".to_string(),
            step,
            input: "input".to_string(),
            context: json!({}),
            emitter: bus.emitter_for("p1"),
            registry: AgentRegistry::new(adapter),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    fn fast_policy(max_attempts: u32) -> StepPolicy {
        StepPolicy {
            step_timeout: Duration::from_millis(100),
            max_attempts,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            cancel_grace: Duration::from_millis(50),
        }
    }

    fn step() -> PlanStep {
        PlanStep::new("arch-backend", AgentKind::BackendArchitect, "", "architecture.backend")
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let mock = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::Succeed(json!({"ok": true}))]));
        let result = run_step(test_run(step(), mock.clone(), fast_policy(3))).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.output["ok"], true);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mock = Arc::new(MockAdapter::new().script(
            "arch-backend",
            vec![
                Scripted::Fail("flaky".into()),
                Scripted::Fail("flaky".into()),
                Scripted::Succeed(json!({})),
            ],
        ));
        let result = run_step(test_run(step(), mock.clone(), fast_policy(3))).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_budget() {
        let mock = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::Hang(Duration::from_secs(5))]));
        let result = run_step(test_run(step(), mock.clone(), fast_policy(2))).await;
        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.agent_id, AgentKind::BackendArchitect);
        assert!(result.errors.iter().all(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_non_object_output_is_failure() {
        let mock = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::Succeed(json!([1, 2]))]));
        let result = run_step(test_run(step(), mock, fast_policy(2))).await;
        assert_eq!(result.status, StepStatus::Failure);
        assert!(result.errors[0].contains("expected a JSON object"));
    }

    #[tokio::test]
    async fn test_warning_status() {
        let mock = Arc::new(
            MockAdapter::new().script("arch-backend", vec![Scripted::Warn(json!({}), "partial".into())]),
        );
        let result = run_step(test_run(step(), mock, fast_policy(1))).await;
        assert_eq!(result.status, StepStatus::Warning);
        assert_eq!(result.errors, vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn test_fallback_gets_own_budget() {
        let mut step = step();
        step.fallback = Some(AgentKind::InfrastructureArchitect);
        let primary = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::Fail("down".into())]));
        let fallback = Arc::new(MockAdapter::new());
        let mut run = test_run(step, primary.clone(), fast_policy(2));
        run.registry = run
            .registry
            .with_adapter(AgentKind::InfrastructureArchitect, fallback.clone());

        let result = run_step(run).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.agent_id, AgentKind::InfrastructureArchitect);
        assert_eq!(result.attempts, 3);
        assert_eq!(primary.call_count(), 2);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cooperative_cancel_is_skipped() {
        let mock = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::WaitForCancel]));
        let mut policy = fast_policy(3);
        policy.step_timeout = Duration::from_secs(10);
        let run = test_run(step(), mock, policy);
        let cancel = run.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = run_step(run).await;
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.errors, vec![CANCELLED_REASON.to_string()]);
    }

    #[tokio::test]
    async fn test_uncooperative_agent_is_abandoned_after_grace() {
        let mock = Arc::new(MockAdapter::new().script("arch-backend", vec![Scripted::Hang(Duration::from_secs(30))]));
        let mut policy = fast_policy(1);
        policy.step_timeout = Duration::from_secs(60);
        let run = test_run(step(), mock, policy);
        let cancel = run.cancel.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = run_step(run).await;
        assert_eq!(result.status, StepStatus::Skipped);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
