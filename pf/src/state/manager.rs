//! StateManager - actor that owns the project Store
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! Every read-modify-write of a project runs inside the actor, so concurrent
//! callers never interleave partial updates. List queries on a file-backed
//! store run on a separate read-only connection and never queue behind writes.

use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{AgentResult, ApprovalState, ExecutionPlan, ProjectRecord, ProjectStatus};
use crate::events::ProgressEvent;

use super::messages::{ProjectUpdate, StateCommand, StateError, StateResponse};
use super::store::{Store, StoreResult};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    reader: Option<Arc<Mutex<Store>>>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the database at `db_path`
    pub fn spawn(db_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(db_path = %db_path.as_ref().display(), "spawn: called");
        let store = Store::open(db_path.as_ref())?;
        let reader = Store::open_reader(db_path.as_ref())?;
        Ok(Self::spawn_with_store(store, Some(reader)))
    }

    /// Spawn over an in-memory database
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::spawn_with_store(Store::open_in_memory()?, None))
    }

    fn spawn_with_store(store: Store, reader: Option<Store>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!(separate_reader = reader.is_some(), "StateManager spawned");
        Self {
            tx,
            reader: reader.map(|r| Arc::new(Mutex::new(r))),
        }
    }

    /// Run a query on the read-only connection, off the async runtime
    async fn on_reader<T, F>(reader: &Arc<Mutex<Store>>, query: F) -> StateResponse<T>
    where
        F: FnOnce(&Store) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let reader = Arc::clone(reader);
        tokio::task::spawn_blocking(move || {
            let store = match reader.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            query(&store).map_err(StateError::from)
        })
        .await
        .map_err(|_| StateError::ChannelError)?
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Project operations ===

    /// Persist a new project record
    pub async fn create_project(&self, record: ProjectRecord) -> StateResponse<String> {
        debug!(project_id = %record.id, "create_project: called");
        self.request(|reply| StateCommand::CreateProject {
            record: Box::new(record),
            reply,
        })
        .await
    }

    pub async fn get_project(&self, id: &str) -> StateResponse<Option<ProjectRecord>> {
        debug!(%id, "get_project: called");
        self.request(|reply| StateCommand::GetProject {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Like `get_project` but a missing record is an error
    pub async fn get_project_required(&self, id: &str) -> StateResponse<ProjectRecord> {
        self.get_project(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Projects, newest first
    pub async fn list_projects(&self, status_filter: Option<ProjectStatus>) -> StateResponse<Vec<ProjectRecord>> {
        debug!(?status_filter, "list_projects: called");
        if let Some(reader) = &self.reader {
            return Self::on_reader(reader, move |store| store.list_projects(status_filter)).await;
        }
        self.request(|reply| StateCommand::ListProjects { status_filter, reply })
            .await
    }

    /// Atomically modify a project record
    ///
    /// The closure runs inside the actor; returning an error leaves the stored
    /// record untouched. `updated_at` is stamped on success.
    pub async fn modify_project<F>(&self, id: &str, apply: F) -> StateResponse<ProjectUpdate>
    where
        F: FnOnce(&mut ProjectRecord) -> StateResponse<()> + Send + 'static,
    {
        debug!(%id, "modify_project: called");
        self.request(|reply| StateCommand::ModifyProject {
            id: id.to_string(),
            apply: Box::new(apply),
            reply,
        })
        .await
    }

    /// Move a project to `next`, validating the lifecycle table
    pub async fn transition_project<F>(&self, id: &str, next: ProjectStatus, also: F) -> StateResponse<ProjectUpdate>
    where
        F: FnOnce(&mut ProjectRecord) + Send + 'static,
    {
        debug!(%id, %next, "transition_project: called");
        self.modify_project(id, move |record| {
            if !record.status.can_transition_to(next) {
                return Err(StateError::InvalidTransition {
                    from: record.status,
                    to: next,
                });
            }
            record.apply_status(next);
            also(record);
            Ok(())
        })
        .await
    }

    /// Delete a project with its plans, results, approvals and events
    pub async fn delete_project(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "delete_project: called");
        self.request(|reply| StateCommand::DeleteProject {
            id: id.to_string(),
            reply,
        })
        .await
    }

    // === Plan operations ===

    pub async fn put_plan(&self, project_id: &str, plan: ExecutionPlan) -> StateResponse<()> {
        debug!(%project_id, plan_id = %plan.id, "put_plan: called");
        self.request(|reply| StateCommand::PutPlan {
            project_id: project_id.to_string(),
            plan: Box::new(plan),
            reply,
        })
        .await
    }

    pub async fn get_plan(&self, id: &str) -> StateResponse<Option<ExecutionPlan>> {
        debug!(%id, "get_plan: called");
        self.request(|reply| StateCommand::GetPlan {
            id: id.to_string(),
            reply,
        })
        .await
    }

    // === Result operations ===

    pub async fn put_result(&self, project_id: &str, result: AgentResult) -> StateResponse<()> {
        debug!(%project_id, step_id = %result.step_id, status = %result.status, "put_result: called");
        self.request(|reply| StateCommand::PutResult {
            project_id: project_id.to_string(),
            result: Box::new(result),
            reply,
        })
        .await
    }

    pub async fn list_results(&self, project_id: &str) -> StateResponse<Vec<AgentResult>> {
        debug!(%project_id, "list_results: called");
        self.request(|reply| StateCommand::ListResults {
            project_id: project_id.to_string(),
            reply,
        })
        .await
    }

    // === Approval operations ===

    pub async fn put_approval(&self, approval: ApprovalState) -> StateResponse<()> {
        debug!(gate_id = %approval.id, decision = %approval.decision, "put_approval: called");
        self.request(|reply| StateCommand::PutApproval {
            approval: Box::new(approval),
            reply,
        })
        .await
    }

    /// Approvals of a project, oldest first
    pub async fn list_approvals(&self, project_id: &str) -> StateResponse<Vec<ApprovalState>> {
        debug!(%project_id, "list_approvals: called");
        self.request(|reply| StateCommand::ListApprovals {
            project_id: project_id.to_string(),
            reply,
        })
        .await
    }

    /// The project's open gate, if any
    pub async fn pending_approval(&self, project_id: &str) -> StateResponse<Option<ApprovalState>> {
        Ok(self
            .list_approvals(project_id)
            .await?
            .into_iter()
            .rev()
            .find(ApprovalState::is_pending))
    }

    // === Event operations ===

    pub async fn append_event(&self, event: ProgressEvent) -> StateResponse<()> {
        self.request(|reply| StateCommand::AppendEvent {
            event: Box::new(event),
            reply,
        })
        .await
    }

    /// The `limit` most recent events, oldest first
    pub async fn list_events(&self, project_id: &str, limit: usize) -> StateResponse<Vec<ProgressEvent>> {
        debug!(%project_id, limit, "list_events: called");
        if let Some(reader) = &self.reader {
            let project_id = project_id.to_string();
            return Self::on_reader(reader, move |store| store.list_events(&project_id, limit)).await;
        }
        self.request(|reply| StateCommand::ListEvents {
            project_id: project_id.to_string(),
            limit,
            reply,
        })
        .await
    }

    pub async fn max_event_seq(&self, project_id: &str) -> StateResponse<u64> {
        self.request(|reply| StateCommand::MaxEventSeq {
            project_id: project_id.to_string(),
            reply,
        })
        .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

fn modify(store: &mut Store, id: &str, apply: super::messages::ProjectModifier) -> StateResponse<ProjectUpdate> {
    let mut record = store
        .get_project(id)?
        .ok_or_else(|| StateError::NotFound(id.to_string()))?;
    let previous_status = record.status;
    apply(&mut record)?;
    record.updated_at = Utc::now();
    store.put_project(&record)?;
    Ok(ProjectUpdate {
        previous_status,
        record,
    })
}

/// Actor loop that processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateProject { record, reply } => {
                debug!(project_id = %record.id, "actor_loop: CreateProject command");
                let result = store.put_project(&record).map(|_| record.id.clone()).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetProject { id, reply } => {
                let _ = reply.send(store.get_project(&id).map_err(StateError::from));
            }

            StateCommand::ListProjects { status_filter, reply } => {
                let _ = reply.send(store.list_projects(status_filter).map_err(StateError::from));
            }

            StateCommand::ModifyProject { id, apply, reply } => {
                debug!(%id, "actor_loop: ModifyProject command");
                let _ = reply.send(modify(&mut store, &id, apply));
            }

            StateCommand::DeleteProject { id, reply } => {
                debug!(%id, "actor_loop: DeleteProject command");
                let _ = reply.send(store.delete_project(&id).map_err(StateError::from));
            }

            StateCommand::PutPlan { project_id, plan, reply } => {
                let _ = reply.send(store.put_plan(&project_id, &plan).map_err(StateError::from));
            }

            StateCommand::GetPlan { id, reply } => {
                let _ = reply.send(store.get_plan(&id).map_err(StateError::from));
            }

            StateCommand::PutResult {
                project_id,
                result,
                reply,
            } => {
                let _ = reply.send(store.put_result(&project_id, &result).map_err(StateError::from));
            }

            StateCommand::ListResults { project_id, reply } => {
                let _ = reply.send(store.list_results(&project_id).map_err(StateError::from));
            }

            StateCommand::PutApproval { approval, reply } => {
                let _ = reply.send(store.put_approval(&approval).map_err(StateError::from));
            }

            StateCommand::ListApprovals { project_id, reply } => {
                let _ = reply.send(store.list_approvals(&project_id).map_err(StateError::from));
            }

            StateCommand::AppendEvent { event, reply } => {
                let _ = reply.send(store.append_event(&event).map_err(StateError::from));
            }

            StateCommand::ListEvents {
                project_id,
                limit,
                reply,
            } => {
                let _ = reply.send(store.list_events(&project_id, limit).map_err(StateError::from));
            }

            StateCommand::MaxEventSeq { project_id, reply } => {
                let _ = reply.send(store.max_event_seq(&project_id).map_err(StateError::from));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, Integrations, ProjectSpec, ProjectType, SpecPayload, Stage};
    use tempfile::tempdir;

    fn record(name: &str) -> ProjectRecord {
        ProjectRecord::new(ProjectSpec {
            project_name: name.to_string(),
            project_type: ProjectType::WebApp,
            payload: SpecPayload::Discovery {
                overview: "a shared shopping list for families".to_string(),
                hints: Default::default(),
            },
            integrations: Integrations::default(),
        })
    }

    #[tokio::test]
    async fn test_create_and_get_project() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path().join("pf.db")).unwrap();

        let rec = record("groceries");
        let id = manager.create_project(rec.clone()).await.unwrap();
        assert_eq!(id, rec.id);

        let fetched = manager.get_project(&id).await.unwrap().unwrap();
        assert_eq!(fetched.spec.project_name, "groceries");
        assert!(manager.get_project("nope").await.unwrap().is_none());
        assert!(matches!(
            manager.get_project_required("nope").await,
            Err(StateError::NotFound(_))
        ));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_queries_do_not_wait_for_writes() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path().join("pf.db")).unwrap();
        let id = manager.create_project(record("pantry")).await.unwrap();

        let slow_write = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move {
                manager
                    .modify_project(&id, |record| {
                        std::thread::sleep(std::time::Duration::from_millis(500));
                        record.last_error = Some("slow".to_string());
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let listed = manager.list_projects(None).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(300));
        assert_eq!(listed.len(), 1);
        assert!(listed[0].last_error.is_none());

        slow_write.await.unwrap().unwrap();
        let listed = manager.list_projects(None).await.unwrap();
        assert_eq!(listed[0].last_error.as_deref(), Some("slow"));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_validates_lifecycle() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager.create_project(record("lists")).await.unwrap();

        let update = manager
            .transition_project(&id, ProjectStatus::InputReceived, |_| {})
            .await
            .unwrap();
        assert_eq!(update.previous_status, ProjectStatus::Pending);
        assert_eq!(update.record.status, ProjectStatus::InputReceived);

        let err = manager
            .transition_project(&id, ProjectStatus::Completed, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::InvalidTransition {
                from: ProjectStatus::InputReceived,
                to: ProjectStatus::Completed
            }
        ));

        let stored = manager.get_project_required(&id).await.unwrap();
        assert_eq!(stored.status, ProjectStatus::InputReceived);
    }

    #[tokio::test]
    async fn test_rejected_modifier_leaves_record_untouched() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager.create_project(record("notes")).await.unwrap();

        let err = manager
            .modify_project(&id, |record| {
                record.last_error = Some("should not stick".to_string());
                Err(StateError::Rejected("nope".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Rejected(_)));
        assert!(manager.get_project_required(&id).await.unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_modifications_are_serialized() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager.create_project(record("counter")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .modify_project(&id, |record| {
                        let n: u32 = record.last_error.as_deref().unwrap_or("0").parse().unwrap_or(0);
                        record.last_error = Some((n + 1).to_string());
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = manager.get_project_required(&id).await.unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("20"));
    }

    #[tokio::test]
    async fn test_pending_approval_is_latest_open_gate() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let mut first = ApprovalState::open("p", Stage::ProductDesign);
        first.decision = Decision::Approved;
        manager.put_approval(first).await.unwrap();
        assert!(manager.pending_approval("p").await.unwrap().is_none());

        let second = ApprovalState::open("p", Stage::Architecture);
        manager.put_approval(second.clone()).await.unwrap();
        let pending = manager.pending_approval("p").await.unwrap().unwrap();
        assert_eq!(pending.id, second.id);
    }

    #[tokio::test]
    async fn test_delete_project() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager.create_project(record("gone")).await.unwrap();
        assert!(manager.delete_project(&id).await.unwrap());
        assert!(manager.get_project(&id).await.unwrap().is_none());
        assert!(!manager.delete_project(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_error_after_shutdown() {
        let manager = StateManager::spawn_in_memory().unwrap();
        manager.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        let result = manager.list_projects(None).await;
        assert!(matches!(result, Err(StateError::ChannelError)));
    }
}
