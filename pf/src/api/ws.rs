//! WebSocket progress stream
//!
//! `GET /ws/projects/{id}` upgrades and forwards the project's bus events as
//! JSON text frames. The stream closes after `workflow_completed`, or right
//! after `connected` when the project has already finished.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, warn};

use super::error::ApiResult;
use crate::events::{EventKind, ProgressEvent, ProjectSubscription};
use crate::scheduler::Orchestrator;

pub async fn project_events(
    ws: WebSocketUpgrade,
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    // Unknown projects get a 404 instead of an upgrade
    let subscription = orchestrator.subscribe(&id).await?;
    debug!(project_id = %id, "project_events: upgrading");
    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription)))
}

/// Whether `event` is the last one a client will receive
pub(crate) fn ends_stream(event: &ProgressEvent) -> bool {
    match &event.kind {
        EventKind::Connected { status, .. } => status.is_terminal(),
        kind => kind.is_final(),
    }
}

async fn stream_events(mut socket: WebSocket, mut subscription: ProjectSubscription) {
    let project_id = subscription.project_id().to_string();
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let last = ends_stream(&event);
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%project_id, error = %e, "stream_events: failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    debug!(%project_id, "stream_events: client went away");
                    return;
                }
                if last {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}
