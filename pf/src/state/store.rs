//! SQLite project store
//!
//! Records are stored as JSON documents next to a few indexed columns used for
//! filtering. Writes go through the `StateManager` actor, which owns the one
//! writable `Store` and therefore serializes every read-modify-write. File-backed
//! stores also get a read-only connection for list queries.

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::{AgentResult, ApprovalState, ExecutionPlan, ProjectRecord, ProjectStatus};
use crate::events::ProgressEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    data        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS plans (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL,
    data        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS results (
    project_id  TEXT NOT NULL,
    step_id     TEXT NOT NULL,
    status      TEXT NOT NULL,
    data        TEXT NOT NULL,
    PRIMARY KEY (project_id, step_id)
);
CREATE TABLE IF NOT EXISTS approvals (
    id          TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL,
    stage       TEXT NOT NULL,
    decision    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    data        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS approvals_project ON approvals (project_id, created_at);
CREATE TABLE IF NOT EXISTS events (
    project_id  TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    event_type  TEXT NOT NULL,
    data        TEXT NOT NULL,
    PRIMARY KEY (project_id, seq)
);
";

/// Durable store for projects, plans, results, approvals and events
pub struct Store {
    conn: Connection,
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(data: &str) -> StoreResult<T> {
    Ok(serde_json::from_str(data)?)
}

impl Store {
    /// Open (or create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Open a read-only connection to a database created by `open`
    pub fn open_reader(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open_reader: called");
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests and dry runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn collect<T: DeserializeOwned>(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json(&row?)?);
        }
        Ok(out)
    }

    // === Projects ===

    /// Insert or replace a project record
    pub fn put_project(&mut self, record: &ProjectRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO projects (id, status, created_at, updated_at, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                to_json(record)?
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> StoreResult<Option<ProjectRecord>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM projects WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| from_json(&d)).transpose()
    }

    /// Projects, newest first, optionally filtered by status
    pub fn list_projects(&self, status: Option<ProjectStatus>) -> StoreResult<Vec<ProjectRecord>> {
        match status {
            Some(status) => self.collect(
                "SELECT data FROM projects WHERE status = ?1 ORDER BY created_at DESC, id",
                params![status.as_str()],
            ),
            None => self.collect("SELECT data FROM projects ORDER BY created_at DESC, id", []),
        }
    }

    /// Remove a project and everything recorded for it
    pub fn delete_project(&mut self, id: &str) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM plans WHERE project_id = ?1", params![id])?;
        tx.execute("DELETE FROM results WHERE project_id = ?1", params![id])?;
        tx.execute("DELETE FROM approvals WHERE project_id = ?1", params![id])?;
        tx.execute("DELETE FROM events WHERE project_id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // === Plans ===

    pub fn put_plan(&mut self, project_id: &str, plan: &ExecutionPlan) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO plans (id, project_id, data) VALUES (?1, ?2, ?3)",
            params![plan.id, project_id, to_json(plan)?],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> StoreResult<Option<ExecutionPlan>> {
        let data: Option<String> = self
            .conn
            .query_row("SELECT data FROM plans WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| from_json(&d)).transpose()
    }

    // === Results ===

    /// Record a step result, replacing any earlier one for the same step
    pub fn put_result(&mut self, project_id: &str, result: &AgentResult) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO results (project_id, step_id, status, data) VALUES (?1, ?2, ?3, ?4)",
            params![project_id, result.step_id, result.status.as_str(), to_json(result)?],
        )?;
        Ok(())
    }

    pub fn list_results(&self, project_id: &str) -> StoreResult<Vec<AgentResult>> {
        self.collect(
            "SELECT data FROM results WHERE project_id = ?1 ORDER BY step_id",
            params![project_id],
        )
    }

    // === Approvals ===

    pub fn put_approval(&mut self, approval: &ApprovalState) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO approvals (id, project_id, stage, decision, created_at, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                approval.id,
                approval.project_id,
                approval.stage.as_str(),
                approval.decision.as_str(),
                approval.created_at.to_rfc3339(),
                to_json(approval)?
            ],
        )?;
        Ok(())
    }

    /// Approvals of a project, oldest first
    pub fn list_approvals(&self, project_id: &str) -> StoreResult<Vec<ApprovalState>> {
        self.collect(
            "SELECT data FROM approvals WHERE project_id = ?1 ORDER BY created_at, rowid",
            params![project_id],
        )
    }

    pub fn count_pending_approvals(&self, project_id: &str) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM approvals WHERE project_id = ?1 AND decision = 'pending'",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Events ===

    /// Append an event; replays of an already stored seq are ignored
    pub fn append_event(&mut self, event: &ProgressEvent) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO events (project_id, seq, event_type, data) VALUES (?1, ?2, ?3, ?4)",
            params![event.project_id, event.seq as i64, event.event_type(), to_json(event)?],
        )?;
        Ok(())
    }

    /// The most recent `limit` events, in sequence order
    pub fn list_events(&self, project_id: &str, limit: usize) -> StoreResult<Vec<ProgressEvent>> {
        let mut events: Vec<ProgressEvent> = self.collect(
            "SELECT data FROM events WHERE project_id = ?1 ORDER BY seq DESC LIMIT ?2",
            params![project_id, limit as i64],
        )?;
        events.reverse();
        Ok(events)
    }

    pub fn max_event_seq(&self, project_id: &str) -> StoreResult<u64> {
        let seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM events WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(seq.unwrap_or(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentKind, Decision, Integrations, ProjectSpec, ProjectType, SpecPayload, Stage, StepStatus};
    use crate::events::EventKind;
    use chrono::Utc;
    use serde_json::json;

    fn record() -> ProjectRecord {
        ProjectRecord::new(ProjectSpec {
            project_name: "shop".to_string(),
            project_type: ProjectType::Api,
            payload: SpecPayload::Direct {
                language_stack: "rust".to_string(),
                frameworks: vec!["axum".to_string()],
                database: Some("postgresql".to_string()),
                overview: None,
            },
            integrations: Integrations::default(),
        })
    }

    fn result(step_id: &str, status: StepStatus) -> AgentResult {
        AgentResult {
            step_id: step_id.to_string(),
            agent_id: AgentKind::CodeGenerator,
            status,
            output: json!({"files": []}),
            errors: vec![],
            duration_ms: 5,
            attempts: 1,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_project_round_trip_and_status_filter() {
        let mut store = Store::open_in_memory().unwrap();
        let mut rec = record();
        store.put_project(&rec).unwrap();
        assert_eq!(store.get_project(&rec.id).unwrap().unwrap(), rec);

        rec.apply_status(ProjectStatus::InputReceived);
        store.put_project(&rec).unwrap();
        assert_eq!(store.list_projects(Some(ProjectStatus::InputReceived)).unwrap().len(), 1);
        assert!(store.list_projects(Some(ProjectStatus::Pending)).unwrap().is_empty());
        assert!(store.get_project("missing").unwrap().is_none());
    }

    #[test]
    fn test_results_replace_on_retry() {
        let mut store = Store::open_in_memory().unwrap();
        store.put_result("p", &result("gen", StepStatus::Failure)).unwrap();
        store.put_result("p", &result("gen", StepStatus::Success)).unwrap();
        let results = store.list_results("p").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, StepStatus::Success);
    }

    #[test]
    fn test_approvals_and_pending_count() {
        let mut store = Store::open_in_memory().unwrap();
        let mut gate = ApprovalState::open("p", Stage::ProductDesign);
        store.put_approval(&gate).unwrap();
        assert_eq!(store.count_pending_approvals("p").unwrap(), 1);

        gate.decision = Decision::Approved;
        gate.resolved_at = Some(Utc::now());
        store.put_approval(&gate).unwrap();
        assert_eq!(store.count_pending_approvals("p").unwrap(), 0);
        assert_eq!(store.list_approvals("p").unwrap().len(), 1);
    }

    #[test]
    fn test_events_keep_latest_in_order() {
        let mut store = Store::open_in_memory().unwrap();
        for seq in 1..=5 {
            let event = ProgressEvent {
                seq,
                project_id: "p".to_string(),
                timestamp: Utc::now(),
                kind: EventKind::Log {
                    message: format!("{}", seq),
                    from: None,
                    to: None,
                },
            };
            store.append_event(&event).unwrap();
            store.append_event(&event).unwrap();
        }
        let events = store.list_events("p", 3).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(store.max_event_seq("p").unwrap(), 5);
        assert_eq!(store.max_event_seq("other").unwrap(), 0);
    }

    #[test]
    fn test_delete_project_cascades() {
        let mut store = Store::open_in_memory().unwrap();
        let rec = record();
        store.put_project(&rec).unwrap();
        store.put_result(&rec.id, &result("gen", StepStatus::Success)).unwrap();
        store.put_approval(&ApprovalState::open(&rec.id, Stage::Architecture)).unwrap();

        assert!(store.delete_project(&rec.id).unwrap());
        assert!(store.get_project(&rec.id).unwrap().is_none());
        assert!(store.list_results(&rec.id).unwrap().is_empty());
        assert!(store.list_approvals(&rec.id).unwrap().is_empty());
        assert!(!store.delete_project(&rec.id).unwrap());
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("projects.db");
        let mut store = Store::open(&path).unwrap();
        store.put_project(&record()).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.list_projects(None).unwrap().len(), 1);
    }

    #[test]
    fn test_reader_sees_committed_writes_and_refuses_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.db");
        let mut writer = Store::open(&path).unwrap();
        let mut reader = Store::open_reader(&path).unwrap();
        assert!(reader.list_projects(None).unwrap().is_empty());

        let rec = record();
        writer.put_project(&rec).unwrap();
        assert_eq!(reader.list_projects(None).unwrap()[0].id, rec.id);
        assert!(reader.put_project(&rec).is_err());
    }
}
