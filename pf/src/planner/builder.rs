//! Execution Plan Builder
//!
//! Pure function of spec + catalogue + configured integrations.

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

use super::PlanBuildError;
use super::catalogue::TemplateCatalogue;
use super::graph::{topological_sort, validate_dependency_graph};
use super::template::StepRenderer;
use crate::domain::{Condition, ExecutionPlan, Integrations, Mode, PlanStep, ProjectSpec, Role, Stage, generate_id};

/// Build the execution plan for a spec
///
/// `available` lists the integrations this deployment has configured; asking
/// for one that is not configured fails before any step is expanded.
pub fn build_plan(
    spec: &ProjectSpec,
    catalogue: &TemplateCatalogue,
    available: &Integrations,
) -> Result<ExecutionPlan, PlanBuildError> {
    let mode = spec.mode();
    debug!(project_name = %spec.project_name, project_type = %spec.project_type, %mode, "build_plan: called");

    for condition in [Condition::IncludeRepo, Condition::IncludeCi, Condition::IncludeJira] {
        if condition.evaluate(&spec.integrations) && !condition.evaluate(available) {
            return Err(PlanBuildError::IntegrationNotConfigured {
                integration: condition.as_str().to_string(),
            });
        }
    }

    let bundle = catalogue
        .bundle(spec.project_type, mode)
        .ok_or(PlanBuildError::MissingBundle {
            project_type: spec.project_type,
            mode,
        })?;

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(bundle.steps.len());
    for template in &bundle.steps {
        if !seen.insert(template.id.as_str()) {
            return Err(PlanBuildError::DuplicateStep(template.id.clone()));
        }
        let stage = template.agent.stage();
        if mode == Mode::Direct && stage == Stage::ProductDesign {
            return Err(PlanBuildError::InvalidTemplate {
                step: template.id.clone(),
                reason: "direct-mode plans have no product design stage".to_string(),
            });
        }
        StepRenderer::check(&template.input).map_err(|reason| PlanBuildError::InvalidTemplate {
            step: template.id.clone(),
            reason,
        })?;

        steps.push(PlanStep {
            id: template.id.clone(),
            agent: template.agent,
            stage,
            depends_on: template.depends_on.clone(),
            when: template.when,
            input: template.input.clone(),
            output_key: template.output_key.clone(),
            optional: template.optional || template.when.is_some(),
            fallback: template.fallback,
        });
    }

    attach_precedence_edges(&mut steps);
    check_edges(&steps)?;

    let order = topological_sort(&steps).map_err(PlanBuildError::DependencyCycle)?;
    let mut ordered: Vec<PlanStep> = order.into_iter().map(|i| steps[i].clone()).collect();
    // Stable: keeps dependency order inside each stage
    ordered.sort_by_key(|s| s.stage);

    let plan = ExecutionPlan {
        id: generate_id("plan", &spec.project_name),
        project_type: spec.project_type,
        mode,
        steps: ordered,
        created_at: Utc::now(),
    };
    info!(plan_id = %plan.id, steps = plan.steps.len(), stages = ?plan.stages(), "Built execution plan");
    Ok(plan)
}

/// Add edges from the fixed role precedence table
fn attach_precedence_edges(steps: &mut [PlanStep]) {
    let by_role = |role: Role, steps: &[PlanStep]| -> Vec<String> {
        steps
            .iter()
            .filter(|s| s.agent.role() == role)
            .map(|s| s.id.clone())
            .collect()
    };

    let mut edges: Vec<BTreeSet<String>> = Vec::with_capacity(steps.len());
    for step in steps.iter() {
        let role = step.agent.role();
        let mut deps = BTreeSet::new();
        for &pred in role.precedes() {
            deps.extend(by_role(pred, steps));
        }
        // Tracking falls back to generation when there is no requirements step
        if role == Role::Tracking && deps.is_empty() {
            deps.extend(by_role(Role::Generation, steps));
        }
        deps.remove(&step.id);
        edges.push(deps);
    }

    for (step, deps) in steps.iter_mut().zip(edges) {
        step.depends_on.extend(deps);
    }
}

/// Every edge must point at a known step in the same or an earlier stage
fn check_edges(steps: &[PlanStep]) -> Result<(), PlanBuildError> {
    for step in steps {
        for dep in &step.depends_on {
            let Some(target) = steps.iter().find(|s| &s.id == dep) else {
                return Err(PlanBuildError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            };
            if target.stage > step.stage {
                return Err(PlanBuildError::InvalidTemplate {
                    step: step.id.clone(),
                    reason: format!("depends on '{}' from the later {} stage", dep, target.stage),
                });
            }
        }
    }
    validate_dependency_graph(steps).map_err(PlanBuildError::DependencyCycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentKind, ProjectType, SpecPayload};
    use crate::planner::catalogue::{StepTemplate, TemplateBundle};
    use proptest::prelude::*;

    fn all_integrations() -> Integrations {
        Integrations {
            include_repo: true,
            include_ci: true,
            include_jira: true,
        }
    }

    fn discovery(project_type: ProjectType) -> ProjectSpec {
        ProjectSpec {
            project_name: "Team Tasks".to_string(),
            project_type,
            payload: SpecPayload::Discovery {
                overview: "task manager for small teams".to_string(),
                hints: Default::default(),
            },
            integrations: Integrations::default(),
        }
    }

    fn direct(project_type: ProjectType) -> ProjectSpec {
        ProjectSpec {
            project_name: "orders".to_string(),
            project_type,
            payload: SpecPayload::Direct {
                language_stack: "python".to_string(),
                frameworks: vec![],
                database: None,
                overview: None,
            },
            integrations: Integrations::default(),
        }
    }

    fn ids(steps: &BTreeSet<String>) -> Vec<&str> {
        steps.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_discovery_web_app_plan_shape() {
        let plan = build_plan(
            &discovery(ProjectType::WebApp),
            &TemplateCatalogue::builtin(),
            &all_integrations(),
        )
        .unwrap();

        assert_eq!(plan.mode, Mode::Discovery);
        assert_eq!(
            plan.stages(),
            vec![Stage::ProductDesign, Stage::Architecture, Stage::Execution]
        );
        assert_eq!(plan.steps_in(Stage::ProductDesign).count(), 1);
        assert_eq!(plan.steps_in(Stage::Architecture).count(), 6);

        let backend = plan.step("arch-backend").unwrap();
        assert_eq!(ids(&backend.depends_on), vec!["product-design"]);

        let generate = plan.step("generate-code").unwrap();
        assert!(generate.depends_on.contains("requirements"));
        assert!(generate.depends_on.contains("arch-frontend"));
        assert_eq!(generate.depends_on.len(), 6);

        let ci = plan.step("ci-pipeline").unwrap();
        assert_eq!(ids(&ci.depends_on), vec!["create-repository", "devops"]);
        assert!(ci.optional);

        let jira = plan.step("jira-sync").unwrap();
        assert_eq!(ids(&jira.depends_on), vec!["requirements"]);
    }

    #[test]
    fn test_direct_plan_has_no_product_design_and_jira_falls_back() {
        let plan = build_plan(&direct(ProjectType::Api), &TemplateCatalogue::builtin(), &all_integrations()).unwrap();
        assert_eq!(plan.stages(), vec![Stage::Architecture, Stage::Execution]);
        assert!(!plan.requires_approval(Stage::Architecture));

        let generate = plan.step("generate-code").unwrap();
        assert_eq!(ids(&generate.depends_on), vec!["resolve-stack"]);
        let jira = plan.step("jira-sync").unwrap();
        assert_eq!(ids(&jira.depends_on), vec!["generate-code"]);
    }

    #[test]
    fn test_integration_not_configured() {
        let mut spec = direct(ProjectType::Api);
        spec.integrations.include_jira = true;
        let err = build_plan(&spec, &TemplateCatalogue::builtin(), &Integrations::default()).unwrap_err();
        match err {
            PlanBuildError::IntegrationNotConfigured { integration } => assert_eq!(integration, "include_jira"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_bundle() {
        let err = build_plan(
            &direct(ProjectType::Desktop),
            &TemplateCatalogue::default(),
            &all_integrations(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanBuildError::MissingBundle {
                project_type: ProjectType::Desktop,
                mode: Mode::Direct
            }
        ));
    }

    fn custom_catalogue(steps: Vec<StepTemplate>) -> TemplateCatalogue {
        TemplateCatalogue {
            bundles: vec![TemplateBundle {
                project_type: ProjectType::Cli,
                mode: Mode::Direct,
                steps,
            }],
        }
    }

    fn template(id: &str, agent: AgentKind, deps: &[&str]) -> StepTemplate {
        StepTemplate {
            id: id.to_string(),
            agent,
            input: "go".to_string(),
            output_key: id.to_string(),
            when: None,
            optional: false,
            fallback: None,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_explicit_cycle_is_rejected() {
        let catalogue = custom_catalogue(vec![
            template("gen", AgentKind::CodeGenerator, &["tests"]),
            template("tests", AgentKind::TestEngineer, &[]),
        ]);
        let err = build_plan(&direct(ProjectType::Cli), &catalogue, &all_integrations()).unwrap_err();
        assert!(matches!(err, PlanBuildError::DependencyCycle(_)));
    }

    #[test]
    fn test_unknown_and_duplicate_steps() {
        let unknown = custom_catalogue(vec![template("gen", AgentKind::CodeGenerator, &["ghost"])]);
        assert!(matches!(
            build_plan(&direct(ProjectType::Cli), &unknown, &all_integrations()).unwrap_err(),
            PlanBuildError::UnknownDependency { .. }
        ));

        let duplicate = custom_catalogue(vec![
            template("gen", AgentKind::CodeGenerator, &[]),
            template("gen", AgentKind::TestEngineer, &[]),
        ]);
        assert!(matches!(
            build_plan(&direct(ProjectType::Cli), &duplicate, &all_integrations()).unwrap_err(),
            PlanBuildError::DuplicateStep(_)
        ));
    }

    #[test]
    fn test_direct_bundle_with_product_design_is_invalid() {
        let catalogue = custom_catalogue(vec![template("pd", AgentKind::ProductManager, &[])]);
        assert!(matches!(
            build_plan(&direct(ProjectType::Cli), &catalogue, &all_integrations()).unwrap_err(),
            PlanBuildError::InvalidTemplate { .. }
        ));
    }

    #[test]
    fn test_bad_template_syntax_is_invalid() {
        let mut broken = template("gen", AgentKind::CodeGenerator, &[]);
        broken.input = "{{#each outputs}}x{{/if}}".to_string();
        let catalogue = custom_catalogue(vec![broken]);
        assert!(matches!(
            build_plan(&direct(ProjectType::Cli), &catalogue, &all_integrations()).unwrap_err(),
            PlanBuildError::InvalidTemplate { .. }
        ));
    }

    fn project_type_strategy() -> impl Strategy<Value = ProjectType> {
        prop::sample::select(ProjectType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_builtin_plans_are_acyclic_and_stage_ordered(
            project_type in project_type_strategy(),
            is_direct in any::<bool>(),
            repo in any::<bool>(),
            ci in any::<bool>(),
            jira in any::<bool>(),
        ) {
            let mut spec = if is_direct { direct(project_type) } else { discovery(project_type) };
            spec.integrations = Integrations { include_repo: repo, include_ci: ci, include_jira: jira };

            let plan = build_plan(&spec, &TemplateCatalogue::builtin(), &all_integrations()).unwrap();
            prop_assert!(validate_dependency_graph(&plan.steps).is_ok());

            let mut seen = HashSet::new();
            for step in &plan.steps {
                for dep in &step.depends_on {
                    prop_assert!(seen.contains(dep.as_str()), "{} listed before its dependency {}", step.id, dep);
                    let target = plan.step(dep).unwrap();
                    prop_assert!(target.stage <= step.stage);
                }
                seen.insert(step.id.as_str());
            }
            prop_assert_eq!(plan.requires_approval(Stage::Architecture), !is_direct);
        }
    }
}
