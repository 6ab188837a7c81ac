//! Template catalogue
//!
//! Bundles of step templates keyed by `(project_type, mode)`. The builtin
//! catalogue covers every project type in both modes; a YAML file can replace
//! it wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::PlanBuildError;
use crate::domain::{AgentKind, Condition, Mode, ProjectType};

/// Appended to every builtin input so rejected steps see the reviewer's notes
const FEEDBACK_BLOCK: &str = "{{#if feedback}}\n\nA reviewer rejected the previous output.\nFeedback: {{feedback.feedback}}\n{{#each feedback.specific_issues}}- {{this}}\n{{/each}}{{/if}}";

/// One step of a bundle before dependency edges are computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: String,
    pub agent: AgentKind,
    pub input: String,
    #[serde(rename = "output-key")]
    pub output_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<AgentKind>,
    /// Extra edges on top of the precedence table
    #[serde(default, rename = "depends-on", skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl StepTemplate {
    fn new(id: &str, agent: AgentKind, output_key: &str, instructions: &str) -> Self {
        Self {
            id: id.to_string(),
            agent,
            input: format!("{}{}", instructions, FEEDBACK_BLOCK),
            output_key: output_key.to_string(),
            when: None,
            optional: false,
            fallback: None,
            depends_on: BTreeSet::new(),
        }
    }

    fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }
}

/// Steps for one `(project_type, mode)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBundle {
    #[serde(rename = "project-type")]
    pub project_type: ProjectType,
    pub mode: Mode,
    pub steps: Vec<StepTemplate>,
}

/// All bundles the plan builder can choose from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCatalogue {
    pub bundles: Vec<TemplateBundle>,
}

impl TemplateCatalogue {
    /// Catalogue shipped with the binary
    pub fn builtin() -> Self {
        debug!("TemplateCatalogue::builtin: called");
        let mut bundles = Vec::new();
        for project_type in ProjectType::ALL {
            bundles.push(TemplateBundle {
                project_type,
                mode: Mode::Discovery,
                steps: discovery_steps(project_type),
            });
            bundles.push(TemplateBundle {
                project_type,
                mode: Mode::Direct,
                steps: direct_steps(),
            });
        }
        Self { bundles }
    }

    /// Load a catalogue from YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanBuildError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "TemplateCatalogue::load: called");
        let content = fs::read_to_string(path)
            .map_err(|e| PlanBuildError::Catalogue(format!("failed to read {}: {}", path.display(), e)))?;
        let catalogue = Self::from_yaml(&content)?;
        info!(path = %path.display(), bundles = catalogue.bundles.len(), "Loaded template catalogue");
        Ok(catalogue)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PlanBuildError> {
        serde_yaml::from_str(content).map_err(|e| PlanBuildError::Catalogue(e.to_string()))
    }

    /// Builtin catalogue unless a path is given
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, PlanBuildError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn bundle(&self, project_type: ProjectType, mode: Mode) -> Option<&TemplateBundle> {
        self.bundles
            .iter()
            .find(|b| b.project_type == project_type && b.mode == mode)
    }
}

fn architect(id: &str, agent: AgentKind, area: &str) -> StepTemplate {
    StepTemplate::new(
        id,
        agent,
        &format!("architecture.{}", area),
        &format!(
            "Design the {area} architecture for {{{{spec.project_name}}}} ({{{{spec.project_type}}}}).\n\n\
             Product design:\n{{{{json artifacts.product_design}}}}\n\n\
             Report every technology choice under `decisions`."
        ),
    )
}

fn execution_steps() -> Vec<StepTemplate> {
    vec![
        StepTemplate::new(
            "generate-code",
            AgentKind::CodeGenerator,
            "code",
            "Generate the project skeleton for {{spec.project_name}}.\n\n\
             Architecture:\n{{json artifacts.architecture_design}}\n\nStack:\n{{json outputs.stack}}",
        ),
        StepTemplate::new(
            "write-tests",
            AgentKind::TestEngineer,
            "tests",
            "Write the test suite for the generated code.\n\n{{json outputs.code}}",
        ),
        StepTemplate::new(
            "devops",
            AgentKind::DevopsEngineer,
            "devops",
            "Produce build and deployment configuration.\n\nTests:\n{{json outputs.tests}}",
        ),
        StepTemplate::new(
            "create-repository",
            AgentKind::RepositoryManager,
            "repository",
            "Create a repository named {{spec.project_name}} and push the generated code.",
        )
        .when(Condition::IncludeRepo),
        StepTemplate::new(
            "ci-pipeline",
            AgentKind::CiPipeline,
            "ci",
            "Configure continuous integration for {{spec.project_name}}.\n\n{{json outputs.devops}}",
        )
        .when(Condition::IncludeCi),
        StepTemplate::new(
            "jira-sync",
            AgentKind::JiraIntegrator,
            "jira",
            "Create tracker issues for {{spec.project_name}}.\n\n{{json outputs.requirements}}",
        )
        .when(Condition::IncludeJira),
    ]
}

fn discovery_steps(project_type: ProjectType) -> Vec<StepTemplate> {
    let mut steps = vec![
        StepTemplate::new(
            "product-design",
            AgentKind::ProductManager,
            "product",
            "Write a product design for {{spec.project_name}} ({{spec.project_type}}).\n\n\
             Overview:\n{{spec.overview}}\n\nHints:\n{{json spec.hints}}",
        ),
        StepTemplate::new(
            "requirements",
            AgentKind::RequirementsAnalyst,
            "requirements",
            "Derive functional and non-functional requirements.\n\n\
             Product design:\n{{json artifacts.product_design}}",
        ),
    ];
    if project_type.has_frontend() {
        steps.push(architect("arch-frontend", AgentKind::FrontendArchitect, "frontend"));
    }
    steps.push(architect("arch-backend", AgentKind::BackendArchitect, "backend"));
    steps.push(architect("arch-database", AgentKind::DatabaseArchitect, "database"));
    steps.push(architect(
        "arch-infrastructure",
        AgentKind::InfrastructureArchitect,
        "infrastructure",
    ));
    steps.push(architect("arch-security", AgentKind::SecurityArchitect, "security"));
    steps.extend(execution_steps());
    steps
}

fn direct_steps() -> Vec<StepTemplate> {
    let mut steps = vec![StepTemplate::new(
        "resolve-stack",
        AgentKind::StackResolver,
        "stack",
        "Resolve exact versions for {{spec.language_stack}} with frameworks {{json spec.frameworks}} \
         and database {{spec.database}} for a {{spec.project_type}} project.",
    )];
    steps.extend(execution_steps());
    steps
}
