//! Builtin deterministic agents
//!
//! Produces structured, repeatable outputs for every agent kind from the
//! project context alone, so a full pipeline runs without external services.
//! Architects share one set of technology choices, so a builtin run never
//! reports conflicts.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AgentAdapter, AgentError, AgentOutput, AgentTask, ProgressReporter};
use crate::domain::AgentKind;

const DEFAULT_DATASTORE: &str = "postgresql";
const DEFAULT_LANGUAGE: &str = "typescript";

/// In-process adapter with canned, context-derived outputs
#[derive(Debug, Default, Clone)]
pub struct BuiltinAdapter;

impl BuiltinAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn spec_str<'a>(context: &'a Value, key: &str) -> Option<&'a str> {
    context.get("spec").and_then(|s| s.get(key)).and_then(Value::as_str)
}

fn project_name(context: &Value) -> &str {
    spec_str(context, "project_name").unwrap_or("project")
}

fn language(context: &Value) -> String {
    spec_str(context, "language_stack")
        .map(str::to_string)
        .or_else(|| {
            context
                .pointer("/outputs/stack/language")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn datastore(context: &Value) -> String {
    spec_str(context, "database")
        .map(str::to_lowercase)
        .unwrap_or_else(|| DEFAULT_DATASTORE.to_string())
}

/// Technology choices every builtin architect agrees on
fn decisions(context: &Value) -> Value {
    json!({
        "primary_datastore": datastore(context),
        "language": language(context),
        "api_style": "rest",
    })
}

fn revision(context: &Value) -> Option<Value> {
    context
        .get("feedback")
        .filter(|f| !f.is_null())
        .and_then(|f| f.get("feedback"))
        .cloned()
}

/// Deterministic output for one agent kind
pub(crate) fn output_for(agent: AgentKind, context: &Value) -> Value {
    let name = project_name(context);
    let mut output = match agent {
        AgentKind::ProductManager => json!({
            "summary": format!("{} product brief", name),
            "personas": ["primary user", "administrator"],
            "features": [
                {"name": "onboarding", "priority": "must"},
                {"name": "core workflow", "priority": "must"},
                {"name": "reporting", "priority": "should"},
            ],
            "user_stories": [
                format!("As a primary user I can sign up for {}", name),
                "As a primary user I can complete the core workflow".to_string(),
            ],
        }),
        AgentKind::RequirementsAnalyst => json!({
            "functional": ["user accounts", "core workflow", "audit history"],
            "non_functional": ["p95 latency under 300ms", "daily backups"],
            "acceptance_criteria": ["every must-have feature has an end-to-end test"],
        }),
        AgentKind::FrontendArchitect => json!({
            "framework": "react",
            "routing": "client-side",
            "components": ["layout", "forms", "dashboard"],
            "decisions": decisions(context),
        }),
        AgentKind::BackendArchitect => json!({
            "services": [format!("{}-api", crate::domain::slugify(name))],
            "endpoints": ["/health", "/v1/resources"],
            "decisions": decisions(context),
        }),
        AgentKind::DatabaseArchitect => json!({
            "engine": datastore(context),
            "tables": ["users", "resources", "audit_log"],
            "migrations": "versioned",
            "decisions": decisions(context),
        }),
        AgentKind::InfrastructureArchitect => json!({
            "runtime": "containers",
            "environments": ["dev", "staging", "prod"],
            "decisions": decisions(context),
        }),
        AgentKind::SecurityArchitect => json!({
            "authentication": "oidc",
            "secrets": "environment",
            "threats": ["credential stuffing", "injection"],
            "decisions": decisions(context),
        }),
        AgentKind::StackResolver => {
            let frameworks = context
                .pointer("/spec/frameworks")
                .cloned()
                .unwrap_or_else(|| json!([]));
            json!({
                "language": language(context),
                "frameworks": frameworks,
                "database": spec_str(context, "database"),
            })
        }
        AgentKind::CodeGenerator => {
            let lang = language(context);
            json!({
                "language": lang,
                "files": [
                    {"path": "README.md", "description": format!("{} overview", name)},
                    {"path": format!("src/main.{}", extension(&lang)), "description": "entry point"},
                ],
            })
        }
        AgentKind::TestEngineer => json!({
            "suites": ["unit", "integration"],
            "files": [{"path": "tests/smoke_test", "description": "smoke test"}],
        }),
        AgentKind::DevopsEngineer => json!({
            "dockerfile": true,
            "compose": ["app", datastore(context)],
        }),
        AgentKind::RepositoryManager => json!({
            "repository": crate::domain::slugify(name),
            "default_branch": "main",
        }),
        AgentKind::CiPipeline => json!({
            "provider": "github-actions",
            "jobs": ["lint", "test", "build"],
        }),
        AgentKind::JiraIntegrator => json!({
            "epics": [format!("{} launch", name)],
            "issues_created": 3,
        }),
    };

    if let (Some(feedback), Some(map)) = (revision(context), output.as_object_mut()) {
        map.insert("revision_notes".to_string(), feedback);
    }
    output
}

fn extension(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "rust" => "rs",
        "typescript" => "ts",
        "javascript" => "js",
        "go" => "go",
        "java" => "java",
        "kotlin" => "kt",
        "csharp" => "cs",
        "ruby" => "rb",
        "swift" => "swift",
        _ => "txt",
    }
}

#[async_trait]
impl AgentAdapter for BuiltinAdapter {
    fn name(&self) -> &'static str {
        "builtin"
    }

    async fn invoke(
        &self,
        task: AgentTask,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        debug!(step_id = %task.step_id, agent = %task.agent, attempt = task.attempt, "BuiltinAdapter::invoke: called");
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        progress.report("started", Some(0));
        let output = output_for(task.agent, &task.context);
        progress.report("finished", Some(100));
        Ok(AgentOutput::new(output))
    }
}
