//! HTTP agent adapter
//!
//! POSTs each task to a remote agent service and maps its reply onto the
//! adapter contract. The service answers with
//! `{"status": "success" | "warning" | "failure", "output": {...}, "errors": [...]}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AgentAdapter, AgentError, AgentOutput, AgentTask, ProgressReporter};
use crate::domain::AgentKind;

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    agent: AgentKind,
    step_id: &'a str,
    project_id: &'a str,
    attempt: u32,
    input: &'a str,
    context: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplyStatus {
    Success,
    Warning,
    Failure,
}

#[derive(Debug, Deserialize)]
struct InvokeReply {
    status: ReplyStatus,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    errors: Vec<String>,
}

/// Adapter for a remote agent endpoint
pub struct HttpAdapter {
    endpoint: String,
    http: Client,
}

impl HttpAdapter {
    /// `timeout` bounds a single request; the scheduler applies its own step timeout on top
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let endpoint = endpoint.into();
        debug!(%endpoint, ?timeout, "HttpAdapter::new: called");
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, task: &AgentTask) -> Result<AgentOutput, AgentError> {
        let body = InvokeRequest {
            agent: task.agent,
            step_id: &task.step_id,
            project_id: &task.project_id,
            attempt: task.attempt,
            input: &task.input,
            context: &task.context,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Failure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%status, "HttpAdapter::post: agent service error");
            return Err(AgentError::Failure(format!("agent service returned {}: {}", status, text)));
        }

        let reply: InvokeReply = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidOutput(e.to_string()))?;

        match reply.status {
            ReplyStatus::Failure => {
                let message = if reply.errors.is_empty() {
                    "agent reported failure".to_string()
                } else {
                    reply.errors.join("; ")
                };
                Err(AgentError::Failure(message))
            }
            ReplyStatus::Success | ReplyStatus::Warning => Ok(AgentOutput {
                output: reply.output,
                warnings: reply.errors,
            }),
        }
    }
}

#[async_trait]
impl AgentAdapter for HttpAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(
        &self,
        task: AgentTask,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        debug!(step_id = %task.step_id, agent = %task.agent, endpoint = %self.endpoint, "HttpAdapter::invoke: called");
        progress.report("dispatched to agent service", None);
        tokio::select! {
            result = self.post(&task) => {
                if let Err(e) = &result {
                    warn!(step_id = %task.step_id, error = %e, "HttpAdapter::invoke: attempt failed");
                }
                result
            }
            _ = cancel.cancelled() => {
                debug!(step_id = %task.step_id, "HttpAdapter::invoke: cancelled");
                Err(AgentError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/invoke", addr)
    }

    fn task() -> AgentTask {
        AgentTask {
            project_id: "p1".to_string(),
            step_id: "arch-backend".to_string(),
            agent: AgentKind::BackendArchitect,
            attempt: 1,
            input: "design the backend".to_string(),
            context: json!({"spec": {"project_name": "shop"}}),
        }
    }

    #[tokio::test]
    async fn test_success_reply_with_warnings() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "status": "warning",
                    "output": {"echo": body["agent"], "input": body["input"]},
                    "errors": ["rate limit close"],
                }))
            }),
        ))
        .await;

        let adapter = HttpAdapter::new(endpoint, Duration::from_secs(5)).unwrap();
        let out = adapter
            .invoke(task(), ProgressReporter::noop(AgentKind::BackendArchitect), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.output["echo"], "backend_architect");
        assert_eq!(out.output["input"], "design the backend");
        assert_eq!(out.warnings, vec!["rate limit close".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_reply_maps_to_failure() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|| async { Json(json!({"status": "failure", "errors": ["no capacity"]})) }),
        ))
        .await;

        let adapter = HttpAdapter::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = adapter
            .invoke(task(), ProgressReporter::noop(AgentKind::BackendArchitect), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Failure(ref m) if m == "no capacity"));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_request() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(json!({"status": "success", "output": {}}))
            }),
        ))
        .await;

        let adapter = HttpAdapter::new(endpoint, Duration::from_secs(60)).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = adapter
            .invoke(task(), ProgressReporter::noop(AgentKind::BackendArchitect), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_failure() {
        let adapter = HttpAdapter::new("http://127.0.0.1:1/invoke", Duration::from_secs(2)).unwrap();
        let err = adapter
            .invoke(task(), ProgressReporter::noop(AgentKind::BackendArchitect), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Failure(_)));
    }
}
