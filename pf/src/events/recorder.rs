//! Event Recorder - persists progress events to the project store
//!
//! The recorder drains the bus's lossless recorder channel and appends each
//! event to the store in publish order, giving every project a durable audit
//! trail that `progress` queries read back.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::types::ProgressEvent;
use crate::state::StateManager;

/// Create the recorder channel and spawn the task that drains it
///
/// The returned sender goes to `ProgressBus::with_recorder`. The task ends
/// once every sender is dropped.
pub fn spawn_event_recorder(state: StateManager) -> (mpsc::UnboundedSender<ProgressEvent>, JoinHandle<()>) {
    debug!("spawn_event_recorder: called");
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_recorder(state, rx));
    (tx, handle)
}

async fn run_recorder(state: StateManager, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    debug!("run_recorder: started");
    while let Some(event) = rx.recv().await {
        let project_id = event.project_id.clone();
        let seq = event.seq;
        if let Err(e) = state.append_event(event).await {
            error!(%project_id, seq, error = %e, "run_recorder: failed to persist event");
        }
    }
    debug!("run_recorder: channel closed, shutting down");
}
