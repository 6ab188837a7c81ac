//! REST handlers

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ApiResult;
use crate::domain::{Mode, ProjectRecord, ProjectStatus, ProjectType, Stage};
use crate::error::EngineError;
use crate::intake::{FieldErrorCode, IntakeRequest, ValidationErrors};
use crate::scheduler::{DecisionAck, Orchestrator, ProgressView, ValidationReport};

/// Response to `POST /projects`
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedProject {
    pub id: String,
    pub status: ProjectStatus,
    pub mode: Mode,
    pub current_phase: Option<Stage>,
    pub created_at: DateTime<Utc>,
}

/// One row of `GET /projects`
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub project_name: String,
    pub project_type: ProjectType,
    pub mode: Mode,
    pub status: ProjectStatus,
    pub current_phase: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProjectRecord> for ProjectSummary {
    fn from(record: &ProjectRecord) -> Self {
        Self {
            id: record.id.clone(),
            project_name: record.spec.project_name.clone(),
            project_type: record.spec.project_type,
            mode: record.mode(),
            status: record.status,
            current_phase: record.current_phase,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBody {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub specific_issues: Vec<String>,
    /// Step ids, agent ids or output keys to re-run; empty re-runs the stage
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub purge: bool,
}

/// Parse a JSON body; an empty body yields the default
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        let mut errors = ValidationErrors::default();
        errors.push("body", FieldErrorCode::InvalidFormat, format!("malformed JSON body: {}", e));
        EngineError::from(errors).into()
    })
}

pub async fn create_project(
    State(orchestrator): State<Orchestrator>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreatedProject>)> {
    let request: IntakeRequest = parse_body(&body)?;
    debug!(project_name = ?request.project_name, "create_project: called");
    let record = orchestrator.create_project(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedProject {
            id: record.id.clone(),
            status: record.status,
            mode: record.mode(),
            current_phase: record.current_phase,
            created_at: record.created_at,
        }),
    ))
}

pub async fn validate_project(State(orchestrator): State<Orchestrator>, body: Bytes) -> ApiResult<Json<ValidationReport>> {
    let request: IntakeRequest = parse_body(&body)?;
    Ok(Json(orchestrator.validate(&request)))
}

pub async fn list_projects(
    State(orchestrator): State<Orchestrator>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ProjectSummary>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<ProjectStatus>().map_err(|message| {
            let mut errors = ValidationErrors::default();
            errors.push("status", FieldErrorCode::Unsupported, message);
            EngineError::from(errors)
        })?),
    };
    let projects = orchestrator.list_projects(status).await?;
    Ok(Json(projects.iter().map(ProjectSummary::from).collect()))
}

pub async fn get_project(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectRecord>> {
    Ok(Json(orchestrator.get_project(&id).await?))
}

pub async fn get_progress(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressView>> {
    Ok(Json(orchestrator.progress(&id).await?))
}

pub async fn approve(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<DecisionAck>> {
    let body: ApproveBody = parse_body(&body)?;
    let ack = orchestrator.approve(&id, body.feedback).await?;
    info!(project_id = %id, gate_id = %ack.gate_id, "approved via API");
    Ok(Json(ack))
}

pub async fn reject(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<DecisionAck>> {
    let body: RejectBody = parse_body(&body)?;
    let ack = orchestrator
        .reject(&id, body.feedback, body.specific_issues, body.targets)
        .await?;
    info!(project_id = %id, gate_id = %ack.gate_id, "rejected via API");
    Ok(Json(ack))
}

/// Cancel a live project, or purge a finished one with `?purge=true`
pub async fn delete_project(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    if query.purge {
        orchestrator.purge(&id).await?;
    } else {
        orchestrator.cancel(&id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
