//! Result Aggregator
//!
//! Fans a stage's step results back in:
//! - failure policy over a step group (`evaluate_group`)
//! - structural merge into one artifact per stage (`consolidate`)
//! - conflict detection across the `decisions` agents report
//!
//! Conflicts never pick a winner; they become review annotations on the
//! artifact shown at the approval gate.

mod conflicts;

pub use conflicts::detect_conflicts;

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{AgentKind, AgentResult, AnnotationKind, Artifact, PlanStep, ReviewAnnotation, Stage, StepStatus};

/// Why a step group failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub step_id: String,
    pub agent_id: AgentKind,
    pub errors: Vec<String>,
}

impl GroupFailure {
    pub fn message(&self) -> String {
        if self.errors.is_empty() {
            format!("step {} ({}) failed", self.step_id, self.agent_id)
        } else {
            format!("step {} ({}) failed: {}", self.step_id, self.agent_id, self.errors.join("; "))
        }
    }
}

/// Apply the group failure policy
///
/// The group fails on the first required step (in plan order) whose result
/// is a failure or missing. Optional steps never fail the group.
pub fn evaluate_group<'a>(
    steps: impl IntoIterator<Item = &'a PlanStep>,
    results: &HashMap<String, AgentResult>,
) -> Result<(), GroupFailure> {
    for step in steps {
        if step.optional {
            continue;
        }
        match results.get(&step.id) {
            Some(result) if result.status.is_resolved_ok() => {}
            Some(result) => {
                return Err(GroupFailure {
                    step_id: step.id.clone(),
                    agent_id: result.agent_id,
                    errors: result.errors.clone(),
                });
            }
            None => {
                return Err(GroupFailure {
                    step_id: step.id.clone(),
                    agent_id: step.agent,
                    errors: vec!["no result recorded".to_string()],
                });
            }
        }
    }
    Ok(())
}

/// Insert `value` at a dotted path, creating intermediate objects
pub fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split('.').filter(|p| !p.is_empty()).peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

/// Outputs of resolved steps, nested by output key
pub fn merge_outputs<'a>(
    steps: impl IntoIterator<Item = &'a PlanStep>,
    results: &HashMap<String, AgentResult>,
) -> Map<String, Value> {
    let mut merged = Map::new();
    for step in steps {
        if let Some(result) = results.get(&step.id)
            && result.status.has_output()
        {
            insert_path(&mut merged, &step.output_key, result.output.clone());
        }
    }
    merged
}

/// Merge a stage's results into its consolidated artifact
///
/// Every step that resolved with output contributes; warnings, failed
/// optional steps and decision conflicts become annotations.
pub fn consolidate<'a>(
    stage: Stage,
    steps: impl IntoIterator<Item = &'a PlanStep>,
    results: &HashMap<String, AgentResult>,
) -> Artifact {
    let steps: Vec<&PlanStep> = steps.into_iter().collect();
    debug!(%stage, step_count = steps.len(), "consolidate: called");

    let mut content = Map::new();
    let mut sources = Vec::new();
    let mut annotations = Vec::new();
    let mut contributing = Vec::new();

    for step in &steps {
        let Some(result) = results.get(&step.id) else {
            continue;
        };
        match result.status {
            StepStatus::Success | StepStatus::Warning => {
                insert_path(&mut content, &step.output_key, result.output.clone());
                sources.push(step.id.clone());
                contributing.push((step.id.as_str(), result));
                if result.status == StepStatus::Warning {
                    for warning in &result.errors {
                        annotations.push(ReviewAnnotation {
                            kind: AnnotationKind::AgentWarning,
                            axis: None,
                            message: format!("{}: {}", step.id, warning),
                            values: Default::default(),
                        });
                    }
                }
            }
            StepStatus::Failure if step.optional => {
                annotations.push(ReviewAnnotation {
                    kind: AnnotationKind::OptionalStepFailed,
                    axis: None,
                    message: format!("optional step {} failed: {}", step.id, result.errors.join("; ")),
                    values: Default::default(),
                });
            }
            StepStatus::Failure | StepStatus::Skipped => {}
        }
    }

    annotations.extend(detect_conflicts(contributing.iter().map(|(id, r)| (*id, &r.output))));

    Artifact {
        artifact_type: stage.artifact_type(),
        content,
        sources,
        annotations,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactType;
    use serde_json::json;

    fn result(step: &PlanStep, status: StepStatus, output: Value, errors: Vec<&str>) -> AgentResult {
        AgentResult {
            step_id: step.id.clone(),
            agent_id: step.agent,
            status,
            output,
            errors: errors.into_iter().map(String::from).collect(),
            duration_ms: 1,
            attempts: 1,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn architecture_steps() -> Vec<PlanStep> {
        vec![
            PlanStep::new("requirements", AgentKind::RequirementsAnalyst, "", "requirements"),
            PlanStep::new("arch-backend", AgentKind::BackendArchitect, "", "architecture.backend"),
            PlanStep::new("arch-database", AgentKind::DatabaseArchitect, "", "architecture.database"),
        ]
    }

    #[test]
    fn test_consolidate_nests_every_success() {
        let steps = architecture_steps();
        let mut results = HashMap::new();
        for step in &steps {
            results.insert(
                step.id.clone(),
                result(step, StepStatus::Success, json!({"from": step.id}), vec![]),
            );
        }

        let artifact = consolidate(Stage::Architecture, &steps, &results);
        assert_eq!(artifact.artifact_type, ArtifactType::ArchitectureDesign);
        assert_eq!(artifact.content["requirements"]["from"], "requirements");
        assert_eq!(artifact.content["architecture"]["backend"]["from"], "arch-backend");
        assert_eq!(artifact.content["architecture"]["database"]["from"], "arch-database");
        assert_eq!(artifact.sources.len(), 3);
        assert!(artifact.annotations.is_empty());
    }

    #[test]
    fn test_conflicting_decisions_are_annotated() {
        let steps = architecture_steps();
        let mut results = HashMap::new();
        results.insert(
            "arch-backend".to_string(),
            result(
                &steps[1],
                StepStatus::Success,
                json!({"decisions": {"primary_datastore": "PostgreSQL", "api_style": "rest"}}),
                vec![],
            ),
        );
        results.insert(
            "arch-database".to_string(),
            result(
                &steps[2],
                StepStatus::Success,
                json!({"decisions": {"primary_datastore": "mongodb", "api_style": "REST"}}),
                vec![],
            ),
        );

        let artifact = consolidate(Stage::Architecture, &steps, &results);
        assert!(artifact.has_conflicts());
        let conflicts: Vec<_> = artifact
            .annotations
            .iter()
            .filter(|a| a.kind == AnnotationKind::ConflictDetected)
            .collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].axis.as_deref(), Some("primary_datastore"));
        assert_eq!(conflicts[0].values["arch-backend"], "PostgreSQL");
        assert_eq!(conflicts[0].values["arch-database"], "mongodb");
        // both outputs are kept
        assert!(artifact.content["architecture"]["backend"].is_object());
        assert!(artifact.content["architecture"]["database"].is_object());
    }

    #[test]
    fn test_required_failure_fails_group() {
        let steps = architecture_steps();
        let mut results = HashMap::new();
        results.insert(
            "requirements".to_string(),
            result(&steps[0], StepStatus::Success, json!({}), vec![]),
        );
        results.insert(
            "arch-backend".to_string(),
            result(&steps[1], StepStatus::Failure, Value::Null, vec!["agent timed out after 10ms"]),
        );
        results.insert(
            "arch-database".to_string(),
            result(&steps[2], StepStatus::Success, json!({}), vec![]),
        );

        let failure = evaluate_group(&steps, &results).unwrap_err();
        assert_eq!(failure.step_id, "arch-backend");
        assert_eq!(failure.agent_id, AgentKind::BackendArchitect);
        assert!(failure.message().contains("timed out"));
    }

    #[test]
    fn test_optional_failure_and_skips_do_not_fail_group() {
        let mut steps = architecture_steps();
        steps.push(PlanStep::new("jira-sync", AgentKind::JiraIntegrator, "", "tracking").with_condition(
            crate::domain::Condition::IncludeJira,
        ));
        let mut results = HashMap::new();
        for step in &steps[..3] {
            results.insert(step.id.clone(), result(step, StepStatus::Success, json!({}), vec![]));
        }
        results.insert(
            "jira-sync".to_string(),
            result(&steps[3], StepStatus::Failure, Value::Null, vec!["jira unreachable"]),
        );

        assert!(evaluate_group(&steps, &results).is_ok());
        let artifact = consolidate(Stage::Architecture, &steps, &results);
        assert!(
            artifact
                .annotations
                .iter()
                .any(|a| a.kind == AnnotationKind::OptionalStepFailed)
        );
        assert!(!artifact.content.contains_key("tracking"));
    }

    #[test]
    fn test_missing_required_result_fails_group() {
        let steps = architecture_steps();
        let failure = evaluate_group(&steps, &HashMap::new()).unwrap_err();
        assert_eq!(failure.step_id, "requirements");
    }

    #[test]
    fn test_warnings_are_annotated() {
        let steps = architecture_steps();
        let mut results = HashMap::new();
        results.insert(
            "requirements".to_string(),
            result(&steps[0], StepStatus::Warning, json!({"functional": []}), vec!["thin overview"]),
        );
        let artifact = consolidate(Stage::Architecture, &steps[..1], &results);
        assert_eq!(artifact.annotations.len(), 1);
        assert_eq!(artifact.annotations[0].kind, AnnotationKind::AgentWarning);
        assert!(artifact.content.contains_key("requirements"));
    }

    #[test]
    fn test_insert_path_replaces_scalar_parent() {
        let mut map = Map::new();
        insert_path(&mut map, "architecture", json!("flat"));
        insert_path(&mut map, "architecture.backend", json!({"x": 1}));
        assert_eq!(map["architecture"]["backend"]["x"], 1);
    }
}
