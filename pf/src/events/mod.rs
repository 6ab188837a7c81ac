//! Progress Event Bus
//!
//! Every observable lifecycle step of a project is published as a
//! `ProgressEvent`. Consumers (WebSocket clients, the CLI, the audit
//! recorder) subscribe to the bus.
//!
//! # Architecture
//!
//! ```text
//!   Scheduler / step runner / agents
//!                 │ publish(project_id, kind)
//!                 ▼
//! ┌──────────────────────────────────────────┐
//! │               PROGRESS BUS               │
//! │  per-project seq + broadcast channel     │
//! └──────────────────────────────────────────┘
//!        │                         │
//!        ▼ (filtered by project)   ▼ (lossless mpsc)
//!   ProjectSubscription        EventRecorder ──► Project Store
//!   (WS, CLI `run`)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let bus = Arc::new(ProgressBus::default());
//! let emitter = bus.emitter_for("0194aa30-project-shop");
//! emitter.phase_started(Stage::ProductDesign, vec!["product-design".into()]);
//!
//! let mut sub = bus.subscribe("0194aa30-project-shop", ProjectStatus::Designing, None);
//! while let Some(event) = sub.recv().await {
//!     println!("{} {}", event.seq, event.event_type());
//! }
//! ```

mod bus;
mod recorder;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, ProgressBus, ProjectEmitter, ProjectSubscription};
pub use recorder::spawn_event_recorder;
pub use types::{EventKind, ProgressEvent};
