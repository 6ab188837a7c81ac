//! Dispatch context for step inputs
//!
//! Agents see `{spec, artifacts, outputs, feedback}`: the normalized spec,
//! the consolidated artifacts of finished stages, every upstream output
//! nested by output key, and reviewer feedback when the step is re-queued
//! after a rejection.

use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

use crate::aggregate::merge_outputs;
use crate::domain::{AgentResult, ApprovalState, ExecutionPlan, PlanStep, ProjectRecord, StepStatus};

/// Build the template/agent context for one dispatch
pub fn step_context(
    record: &ProjectRecord,
    plan: &ExecutionPlan,
    results: &HashMap<String, AgentResult>,
    feedback: Option<Value>,
) -> Value {
    json!({
        "spec": record.spec,
        "artifacts": {
            "product_design": record.product_design.as_ref().map(|a| &a.content),
            "architecture_design": record.architecture_design.as_ref().map(|a| &a.content),
        },
        "outputs": merge_outputs(&plan.steps, results),
        "feedback": feedback.unwrap_or(Value::Null),
    })
}

/// Feedback block for a step re-queued by `rejection`
pub fn feedback_for(rejection: &ApprovalState, previous: Option<&AgentResult>) -> Value {
    json!({
        "feedback": rejection.feedback,
        "specific_issues": rejection.specific_issues,
        "previous_output": previous.map(|r| &r.output),
    })
}

fn needs_first_run(step: &PlanStep, results: &HashMap<String, AgentResult>) -> bool {
    match results.get(&step.id) {
        None => true,
        Some(result) => result.status == StepStatus::Failure && !step.optional,
    }
}

/// Steps a rejection re-queues: its targets plus their same-stage dependents
pub fn rejection_targets<'a>(stage_steps: &[&'a PlanStep], rejection: &ApprovalState) -> HashSet<&'a str> {
    let mut targeted: HashSet<&str> = stage_steps
        .iter()
        .filter(|s| rejection.targets_step(s))
        .map(|s| s.id.as_str())
        .collect();
    loop {
        let before = targeted.len();
        for step in stage_steps {
            if step.depends_on.iter().any(|d| targeted.contains(d.as_str())) {
                targeted.insert(step.id.as_str());
            }
        }
        if targeted.len() == before {
            return targeted;
        }
    }
}

/// Steps of a stage that still have to run
///
/// Without a rejection: every step lacking a usable result. With one:
/// additionally each re-queued step whose result predates the decision.
/// Results recorded after the decision count as already re-run.
pub fn steps_to_run<'a>(
    stage_steps: &[&'a PlanStep],
    results: &HashMap<String, AgentResult>,
    rejection: Option<&ApprovalState>,
) -> Vec<&'a PlanStep> {
    let targeted = rejection.map(|r| (rejection_targets(stage_steps, r), r.resolved_at.unwrap_or(r.created_at)));
    stage_steps
        .iter()
        .copied()
        .filter(|step| {
            if needs_first_run(step, results) {
                return true;
            }
            match &targeted {
                Some((ids, decided_at)) if ids.contains(step.id.as_str()) => results
                    .get(&step.id)
                    .is_none_or(|r| r.completed_at <= *decided_at),
                _ => false,
            }
        })
        .collect()
}
