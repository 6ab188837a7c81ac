//! ExecutionPlan and PlanStep domain types
//!
//! A plan is a DAG of steps. Each step belongs to one stage; stages run in
//! order and steps within a stage run as soon as their dependencies resolve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use super::agent::AgentKind;
use super::record::ProjectStatus;
use super::spec::{Integrations, Mode, ProjectType};

/// Ordered group of steps inside a lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProductDesign,
    Architecture,
    Execution,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::ProductDesign, Stage::Architecture, Stage::Execution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProductDesign => "product_design",
            Stage::Architecture => "architecture",
            Stage::Execution => "execution",
        }
    }

    /// Lifecycle status the project is in while this stage runs
    pub fn phase(&self) -> ProjectStatus {
        match self {
            Stage::ProductDesign | Stage::Architecture => ProjectStatus::Designing,
            Stage::Execution => ProjectStatus::Executing,
        }
    }

    /// Consolidated artifact this stage produces
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Stage::ProductDesign => ArtifactType::ProductDesign,
            Stage::Architecture => ArtifactType::ArchitectureDesign,
            Stage::Execution => ArtifactType::GeneratedProject,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of consolidated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    ProductDesign,
    ArchitectureDesign,
    GeneratedProject,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::ProductDesign => "product_design",
            ArtifactType::ArchitectureDesign => "architecture_design",
            ArtifactType::GeneratedProject => "generated_project",
        }
    }
}

/// Predicate gating a conditional step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    IncludeRepo,
    IncludeCi,
    IncludeJira,
}

impl Condition {
    pub fn evaluate(&self, integrations: &Integrations) -> bool {
        match self {
            Condition::IncludeRepo => integrations.include_repo,
            Condition::IncludeCi => integrations.include_ci,
            Condition::IncludeJira => integrations.include_jira,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::IncludeRepo => "include_repo",
            Condition::IncludeCi => "include_ci",
            Condition::IncludeJira => "include_jira",
        }
    }
}

/// A single unit of work in an execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Unique step identifier within the plan
    pub id: String,

    /// Agent that executes the step
    pub agent: AgentKind,

    /// Stage the step runs in (derived from the agent's role)
    pub stage: Stage,

    /// Step IDs that must resolve before this one is dispatched
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    /// Conditional predicate; the step is skipped when it evaluates false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,

    /// Handlebars template rendered into the agent's task input
    pub input: String,

    /// Key under which the output lands in the consolidated artifact
    pub output_key: String,

    /// Failure of an optional step does not fail its group
    #[serde(default)]
    pub optional: bool,

    /// Agent tried once the primary exhausts its retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<AgentKind>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, agent: AgentKind, input: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent,
            stage: agent.stage(),
            depends_on: BTreeSet::new(),
            when: None,
            input: input.into(),
            output_key: output_key.into(),
            optional: false,
            fallback: None,
        }
    }

    pub fn with_dependency(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self.optional = true;
        self
    }

    /// Whether the step should run for the given integrations
    pub fn is_enabled(&self, integrations: &Integrations) -> bool {
        self.when.is_none_or(|c| c.evaluate(integrations))
    }

    /// Whether a rejection target names this step
    ///
    /// Targets match the step id, the agent id, the output key, or the output
    /// key's prefix before the first `.` (so `architecture` hits every
    /// `architecture.*` step).
    pub fn matches_target(&self, target: &str) -> bool {
        let target = target.trim();
        if target.is_empty() {
            return false;
        }
        self.id == target
            || self.agent.as_str() == target
            || self.output_key == target
            || self.output_key.split('.').next() == Some(target)
    }
}

/// Ordered DAG of steps derived from a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub project_type: ProjectType,
    pub mode: Mode,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps of a stage in plan order
    pub fn steps_in(&self, stage: Stage) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(move |s| s.stage == stage)
    }

    /// Stages present in the plan, in execution order
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.steps.iter().any(|s| s.stage == *stage))
            .collect()
    }

    /// Whether an approval gate closes the given stage
    ///
    /// Only discovery-mode design stages are gated.
    pub fn requires_approval(&self, stage: Stage) -> bool {
        let gated = self.mode == Mode::Discovery && stage != Stage::Execution;
        debug!(plan_id = %self.id, %stage, gated, "ExecutionPlan::requires_approval: called");
        gated
    }
}
