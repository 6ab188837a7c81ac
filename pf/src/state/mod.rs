//! Project Store with actor pattern
//!
//! StateManager owns the SQLite Store and processes messages via channels,
//! providing serialized access to projects, plans, results, approvals and the
//! event audit trail.

mod manager;
mod messages;
mod recovery;
mod store;

pub use manager::StateManager;
pub use messages::{ProjectModifier, ProjectUpdate, StateCommand, StateError, StateResponse};
pub use recovery::{RecoveryScan, RecoveryStats, scan_for_recovery};
pub use store::{Store, StoreError, StoreResult};
