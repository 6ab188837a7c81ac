//! Execution planning
//!
//! Template catalogue, plan builder and DAG helpers.

mod builder;
mod catalogue;
mod graph;
mod template;

use thiserror::Error;

use crate::domain::{Mode, ProjectType};

pub use builder::build_plan;
pub use catalogue::{StepTemplate, TemplateBundle, TemplateCatalogue};
pub use graph::{ready_steps, topological_sort, validate_dependency_graph};
pub use template::StepRenderer;

/// Why a plan could not be built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanBuildError {
    #[error("no template bundle for project type '{project_type}' in {mode} mode")]
    MissingBundle { project_type: ProjectType, mode: Mode },

    #[error("integration '{integration}' was requested but is not configured on this deployment")]
    IntegrationNotConfigured { integration: String },

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("invalid template for step '{step}': {reason}")]
    InvalidTemplate { step: String, reason: String },

    #[error("template catalogue error: {0}")]
    Catalogue(String),
}
