//! Progress Event Bus - per-project ordered pub/sub
//!
//! A single tokio broadcast channel carries every project's events. The bus
//! assigns each event the next sequence number of its project while holding a
//! lock, so send order always matches sequence order (per-project FIFO).
//! Subscribers filter by project and receive a synthesized `connected` event
//! first; there is no historical replay.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::types::{EventKind, ProgressEvent};
use crate::domain::{AgentKind, ProjectStatus, Stage, StepStatus};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Central event bus for project progress
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
    sequences: Mutex<HashMap<String, u64>>,
    /// Lossless copy of every event for the audit recorder
    recorder: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "ProgressBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequences: Mutex::new(HashMap::new()),
            recorder: None,
        }
    }

    /// Bus that also forwards every event to a recorder channel
    pub fn with_recorder(capacity: usize, recorder: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            recorder: Some(recorder),
            ..Self::new(capacity)
        }
    }

    /// Publish an event for a project, returning it with its sequence number
    ///
    /// Fire-and-forget: with no subscribers the live copy is dropped.
    pub fn publish(&self, project_id: &str, kind: EventKind) -> ProgressEvent {
        let mut sequences = match self.sequences.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = sequences.entry(project_id.to_string()).or_insert(0);
        *seq += 1;
        let event = ProgressEvent {
            seq: *seq,
            project_id: project_id.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        debug!(%project_id, seq = event.seq, event_type = event.event_type(), "ProgressBus::publish");

        if let Some(recorder) = &self.recorder
            && recorder.send(event.clone()).is_err()
        {
            warn!(%project_id, "ProgressBus::publish: recorder has stopped");
        }
        let _ = self.tx.send(event.clone());
        event
    }

    /// Last sequence number issued for a project (0 if none)
    pub fn last_seq(&self, project_id: &str) -> u64 {
        match self.sequences.lock() {
            Ok(guard) => guard.get(project_id).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(project_id).copied().unwrap_or(0),
        }
    }

    /// Continue numbering after `last_seq` (used when resuming from the store)
    pub fn seed_sequence(&self, project_id: &str, last_seq: u64) {
        debug!(%project_id, last_seq, "ProgressBus::seed_sequence: called");
        let mut sequences = match self.sequences.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = sequences.entry(project_id.to_string()).or_insert(0);
        *seq = (*seq).max(last_seq);
    }

    /// Drop the sequence counter of a purged project
    pub fn forget(&self, project_id: &str) {
        let mut sequences = match self.sequences.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sequences.remove(project_id);
    }

    /// Subscribe to one project's events
    ///
    /// The `connected` payload describes the project at join time.
    pub fn subscribe(&self, project_id: &str, status: ProjectStatus, current_phase: Option<Stage>) -> ProjectSubscription {
        debug!(%project_id, "ProgressBus::subscribe: new subscriber");
        let rx = self.tx.subscribe();
        let connected = ProgressEvent {
            seq: self.last_seq(project_id),
            project_id: project_id.to_string(),
            timestamp: Utc::now(),
            kind: EventKind::Connected { status, current_phase },
        };
        ProjectSubscription {
            project_id: project_id.to_string(),
            rx,
            connected: Some(connected),
        }
    }

    /// Emitter bound to one project
    pub fn emitter_for(self: &Arc<Self>, project_id: impl Into<String>) -> ProjectEmitter {
        ProjectEmitter {
            bus: Arc::clone(self),
            project_id: project_id.into(),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Live, ordered stream of one project's events
pub struct ProjectSubscription {
    project_id: String,
    rx: broadcast::Receiver<ProgressEvent>,
    connected: Option<ProgressEvent>,
}

impl ProjectSubscription {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Next event, or None once the bus is gone
    ///
    /// A subscriber that falls more than the channel capacity behind skips
    /// the overwritten events and keeps going.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(connected) = self.connected.take() {
            return Some(connected);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.project_id == self.project_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(project_id = %self.project_id, skipped, "ProjectSubscription::recv: subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle for emitting a single project's events
#[derive(Clone)]
pub struct ProjectEmitter {
    bus: Arc<ProgressBus>,
    project_id: String,
}

impl ProjectEmitter {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn emit(&self, kind: EventKind) -> ProgressEvent {
        self.bus.publish(&self.project_id, kind)
    }

    // === Convenience methods ===

    pub fn phase_started(&self, stage: Stage, steps: Vec<String>) {
        self.emit(EventKind::PhaseStarted {
            phase: stage.phase(),
            stage,
            steps,
        });
    }

    pub fn phase_completed(&self, stage: Stage, success: bool) {
        self.emit(EventKind::PhaseCompleted {
            phase: stage.phase(),
            stage,
            success,
        });
    }

    pub fn agent_started(&self, step_id: &str, agent_id: AgentKind, attempt: u32) {
        self.emit(EventKind::AgentStarted {
            step_id: step_id.to_string(),
            agent_id,
            attempt,
        });
    }

    pub fn agent_progress(&self, step_id: &str, agent_id: AgentKind, message: &str, percent: Option<u8>) {
        self.emit(EventKind::AgentProgress {
            step_id: step_id.to_string(),
            agent_id,
            message: message.to_string(),
            percent,
        });
    }

    pub fn agent_completed(&self, step_id: &str, agent_id: AgentKind, status: StepStatus, duration_ms: u64, attempts: u32) {
        self.emit(EventKind::AgentCompleted {
            step_id: step_id.to_string(),
            agent_id,
            status,
            duration_ms,
            attempts,
        });
    }

    pub fn error(&self, message: &str, agent_id: Option<AgentKind>, step_id: Option<&str>) {
        self.emit(EventKind::Error {
            message: message.to_string(),
            agent_id,
            step_id: step_id.map(str::to_string),
        });
    }

    pub fn log(&self, message: &str) {
        self.emit(EventKind::Log {
            message: message.to_string(),
            from: None,
            to: None,
        });
    }

    pub fn transition(&self, from: ProjectStatus, to: ProjectStatus) {
        self.emit(EventKind::Log {
            message: format!("status {} -> {}", from, to),
            from: Some(from),
            to: Some(to),
        });
    }

    pub fn workflow_completed(&self, status: ProjectStatus) {
        self.emit(EventKind::WorkflowCompleted { status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(message: &str) -> EventKind {
        EventKind::Log {
            message: message.to_string(),
            from: None,
            to: None,
        }
    }

    #[test]
    fn test_sequences_are_per_project() {
        let bus = ProgressBus::new(16);
        assert_eq!(bus.publish("a", log("1")).seq, 1);
        assert_eq!(bus.publish("a", log("2")).seq, 2);
        assert_eq!(bus.publish("b", log("1")).seq, 1);
        assert_eq!(bus.last_seq("a"), 2);
        assert_eq!(bus.last_seq("missing"), 0);
    }

    #[test]
    fn test_seed_sequence_never_goes_backwards() {
        let bus = ProgressBus::new(16);
        bus.seed_sequence("a", 10);
        bus.seed_sequence("a", 3);
        assert_eq!(bus.publish("a", log("x")).seq, 11);
        bus.forget("a");
        assert_eq!(bus.last_seq("a"), 0);
    }

    #[tokio::test]
    async fn test_subscription_starts_with_connected_and_filters() {
        let bus = Arc::new(ProgressBus::new(16));
        bus.publish("p1", log("before join"));

        let mut sub = bus.subscribe("p1", ProjectStatus::Designing, Some(Stage::ProductDesign));
        bus.publish("p2", log("other project"));
        let emitter = bus.emitter_for("p1");
        emitter.log("after join");

        let connected = sub.recv().await.unwrap();
        assert_eq!(connected.event_type(), "connected");
        assert_eq!(connected.seq, 1);

        let next = sub.recv().await.unwrap();
        assert_eq!(next.project_id, "p1");
        assert_eq!(next.seq, 2);
        assert_eq!(next.kind, log("after join"));
    }

    #[tokio::test]
    async fn test_subscribers_see_fifo_order() {
        let bus = Arc::new(ProgressBus::new(64));
        let mut sub = bus.subscribe("p", ProjectStatus::Executing, None);
        let emitter = bus.emitter_for("p");
        for i in 0..20 {
            emitter.log(&format!("{}", i));
        }
        let _ = sub.recv().await;
        let mut last = 0;
        for _ in 0..20 {
            let event = sub.recv().await.unwrap();
            assert!(event.seq > last);
            last = event.seq;
        }
    }

    #[tokio::test]
    async fn test_recorder_receives_every_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = ProgressBus::with_recorder(1, tx);
        for i in 0..5 {
            bus.publish("p", log(&i.to_string()));
        }
        for expected in 1..=5 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let bus = ProgressBus::default();
        let event = bus.publish("p", log("nobody listening"));
        assert_eq!(event.seq, 1);
    }
}
