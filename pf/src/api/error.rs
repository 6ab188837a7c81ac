//! HTTP error envelope
//!
//! Every REST error renders as `{error, message, request_id, details?}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::EngineError;
use crate::intake::FieldError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Engine error on its way to an HTTP response
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) | EngineError::PlanBuild(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InvalidState(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Store(_) | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match &self.0 {
            EngineError::Validation(errors) => Some(errors.details.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.0.code(),
            message: self.0.to_string(),
            request_id: uuid::Uuid::now_v7().to_string(),
            details,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        if status.is_server_error() {
            error!(request_id = %body.request_id, error = %self.0, "request failed");
        } else {
            warn!(request_id = %body.request_id, code = body.error, message = %body.message, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
