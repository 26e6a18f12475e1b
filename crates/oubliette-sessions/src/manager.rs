//! Session lifecycle: spawn, resume, message, cancel, end, delete.
//!
//! Depth and fan-out checks run under a per-project async lock, so two
//! concurrent spawns cannot both pass a cap with one slot left, and
//! concurrent resumes of one session serialize — the first launches the
//! runtime, the rest attach to the winner's executor.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use oubliette_agent::contract::{AgentEvent, ExecuteRequest};
use oubliette_agent::{AgentError, AgentRuntime, StreamingExecutor};
use oubliette_core::config::Reasoning;
use oubliette_core::events::{StreamEvent, StreamEventKind};
use oubliette_core::{ProjectId, SessionId, TokenId};
use oubliette_projects::{ProjectPaths, ProjectRecord, Provisioner, WorkspaceRecord};
use oubliette_store::repositories::{SessionFilter, SessionRepository};
use oubliette_store::types::{NewSession, SessionRecord, SessionStatus};
use oubliette_store::ConnectionPool;

use crate::bus::{SessionBus, Subscription};
use crate::errors::SessionError;

/// Inputs for spawning a session.
#[derive(Clone, Debug)]
pub struct SpawnOptions {
    /// The project to spawn into.
    pub project: ProjectRecord,
    /// Target workspace (already resolved against the project).
    pub workspace: WorkspaceRecord,
    /// Spawning session, for nested spawns.
    pub parent_session_id: Option<SessionId>,
    /// Initial prompt; empty attaches without sending.
    pub prompt: Option<String>,
    /// Token that is creating the session.
    pub creator_token_id: TokenId,
    /// The creator's scope string, re-checked on every relay call.
    pub creator_scope: String,
}

struct ActiveSession {
    executor: Arc<dyn StreamingExecutor>,
    bus: Arc<SessionBus>,
}

type ActiveMap = Arc<DashMap<SessionId, Arc<ActiveSession>>>;

/// The session manager.
pub struct SessionManager {
    pool: ConnectionPool,
    runtime: Arc<dyn AgentRuntime>,
    provisioner: Arc<dyn Provisioner>,
    active: ActiveMap,
    buses: DashMap<SessionId, Arc<SessionBus>>,
    project_locks: DashMap<ProjectId, Arc<AsyncMutex<()>>>,
    ring_capacity: usize,
}

impl SessionManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        pool: ConnectionPool,
        runtime: Arc<dyn AgentRuntime>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            runtime,
            provisioner,
            active: Arc::new(DashMap::new()),
            buses: DashMap::new(),
            project_locks: DashMap::new(),
            ring_capacity: oubliette_core::constants::EVENT_RING_CAPACITY,
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Spawn a new session; the subscription replays from sequence 0.
    #[instrument(skip_all, fields(project = %opts.project.id, parent = ?opts.parent_session_id))]
    pub async fn spawn(
        &self,
        opts: SpawnOptions,
    ) -> Result<(SessionRecord, Subscription), SessionError> {
        let lock = self.project_lock(&opts.project.id);
        let _guard = lock.lock().await;

        let depth = self.check_caps(&opts)?;

        self.provisioner
            .ensure_ready(&opts.project)
            .await
            .map_err(|e| SessionError::ContainerUnavailable(e.to_string()))?;

        let session_id = SessionId::new();
        let record = {
            let conn = self.conn()?;
            SessionRepository::insert(
                &conn,
                &NewSession {
                    id: session_id.clone(),
                    project_id: opts.project.id.clone(),
                    workspace_id: opts.workspace.id.clone(),
                    parent_session_id: opts.parent_session_id.clone(),
                    depth,
                    creator_token_id: opts.creator_token_id.clone(),
                    creator_scope: opts.creator_scope.clone(),
                },
            )?
        };

        let request = ExecuteRequest {
            project_id: opts.project.id.clone(),
            session_id: session_id.clone(),
            depth,
            working_dir: ProjectPaths::container_workspace_dir(&opts.workspace),
            model: opts.project.agent.model.clone(),
            reasoning: opts.project.agent.reasoning,
            initial_prompt: opts.prompt.clone(),
            resume_runtime_session_id: None,
            env: HashMap::new(),
        };

        let executor = match self.runtime.execute_streaming(request).await {
            Ok(executor) => executor,
            Err(e) => {
                // No session record survives a failed launch.
                if let Ok(conn) = self.conn() {
                    let _ = SessionRepository::set_status(&conn, &session_id, SessionStatus::Gone);
                }
                return Err(map_launch_error(e));
            }
        };

        if let Some(runtime_session_id) = executor.runtime_session_id() {
            let conn = self.conn()?;
            SessionRepository::set_runtime_session_id(&conn, &session_id, &runtime_session_id)?;
        }

        let bus = self.bus_for(&session_id);
        bus.reopen();
        self.attach(&session_id, executor, &bus)?;
        let subscription = bus.subscribe(0);

        info!(session = %session_id, depth, "session spawned");
        let record = self.get(&session_id).ok().unwrap_or(record);
        Ok((record, subscription))
    }

    /// Resume a detached session, or attach to it if already active.
    #[instrument(skip(self, project), fields(session = %session_id))]
    pub async fn resume(
        &self,
        session_id: &SessionId,
        project: &ProjectRecord,
    ) -> Result<(SessionRecord, Subscription), SessionError> {
        let lock = self.project_lock(&project.id);
        let _guard = lock.lock().await;

        // Race: a concurrent resume may have won while we waited.
        if let Some(active) = self.active.get(session_id) {
            if active.executor.is_closed() {
                return Err(SessionError::AlreadyDetaching(session_id.to_string()));
            }
            let subscription = active.bus.subscribe(0);
            let record = self.get(session_id)?;
            return Ok((record, subscription));
        }

        let record = self.get(session_id)?;
        let runtime_session_id = record
            .runtime_session_id
            .clone()
            .ok_or_else(|| {
                SessionError::ResumeFailed(format!("session {session_id} has no runtime session"))
            })?;

        self.provisioner
            .ensure_ready(project)
            .await
            .map_err(|e| SessionError::ContainerUnavailable(e.to_string()))?;

        let workspace = project
            .workspace(&record.workspace_id)
            .cloned()
            .ok_or_else(|| SessionError::ResumeFailed("workspace removed".into()))?;

        let request = ExecuteRequest {
            project_id: project.id.clone(),
            session_id: session_id.clone(),
            depth: record.depth,
            working_dir: ProjectPaths::container_workspace_dir(&workspace),
            model: project.agent.model.clone(),
            reasoning: project.agent.reasoning,
            initial_prompt: None,
            resume_runtime_session_id: Some(runtime_session_id),
            env: HashMap::new(),
        };

        let executor = match self.runtime.execute_streaming(request).await {
            Ok(executor) => executor,
            Err(AgentError::SessionDiscarded(id)) => {
                return Err(SessionError::ResumeFailed(format!(
                    "backend discarded runtime session {id}"
                )));
            }
            Err(e) => return Err(map_launch_error(e)),
        };

        {
            let conn = self.conn()?;
            SessionRepository::set_status(&conn, session_id, SessionStatus::Active)?;
        }

        let bus = self.bus_for(session_id);
        bus.reopen();
        self.attach(session_id, executor, &bus)?;
        let subscription = bus.subscribe(0);

        info!(session = %session_id, "session resumed");
        Ok((self.get(session_id)?, subscription))
    }

    /// Send a message into an active session. Not idempotent.
    pub async fn message(
        &self,
        session_id: &SessionId,
        text: &str,
        reasoning: Option<Reasoning>,
    ) -> Result<(), SessionError> {
        let active = self
            .active
            .get(session_id)
            .ok_or_else(|| SessionError::NotActive(session_id.to_string()))?
            .clone();
        match active.executor.send_message(text, reasoning).await {
            Ok(()) => {
                if let Ok(conn) = self.conn() {
                    let _ = SessionRepository::touch(&conn, session_id);
                }
                Ok(())
            }
            Err(AgentError::Closed) => Err(SessionError::NotActive(session_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Request a soft interrupt. Best-effort and asynchronous; observe the
    /// outcome on the event stream.
    pub async fn cancel(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let active = self
            .active
            .get(session_id)
            .ok_or_else(|| SessionError::NotActive(session_id.to_string()))?
            .clone();
        {
            let conn = self.conn()?;
            SessionRepository::set_status(&conn, session_id, SessionStatus::Cancelling)?;
        }
        active.executor.cancel().await?;
        Ok(())
    }

    /// Detach a session: close the executor, keep the record resumable.
    pub async fn end(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let Some((_, active)) = self.active.remove(session_id) else {
            // Already detached; make the state explicit and succeed.
            let record = self.get(session_id)?;
            if record.status != SessionStatus::Detached {
                let conn = self.conn()?;
                SessionRepository::set_status(&conn, session_id, SessionStatus::Detached)?;
            }
            return Ok(());
        };
        let _ = active.executor.close().await;
        active.bus.close();
        let conn = self.conn()?;
        SessionRepository::set_status(&conn, session_id, SessionStatus::Detached)?;
        debug!(session = %session_id, "session detached");
        Ok(())
    }

    /// Delete a session record permanently.
    pub async fn delete(&self, session_id: &SessionId) -> Result<(), SessionError> {
        if let Some((_, active)) = self.active.remove(session_id) {
            let _ = active.executor.close().await;
            active.bus.close();
        }
        let _ = self.buses.remove(session_id);
        let conn = self.conn()?;
        SessionRepository::set_status(&conn, session_id, SessionStatus::Gone)?;
        info!(session = %session_id, "session deleted");
        Ok(())
    }

    /// Detach every active session of a project and mark the records gone.
    /// Project-deletion cascade.
    pub async fn purge_project(&self, project_id: &ProjectId) -> Result<u32, SessionError> {
        let ids: Vec<SessionId> = self
            .active
            .iter()
            .filter(|entry| {
                self.get(entry.key())
                    .map(|r| &r.project_id == project_id)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            if let Some((_, active)) = self.active.remove(id) {
                let _ = active.executor.close().await;
                active.bus.close();
            }
            let _ = self.buses.remove(id);
        }
        let conn = self.conn()?;
        Ok(SessionRepository::mark_project_gone(&conn, project_id)?)
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Fetch the persisted record. `gone` sessions read as not found.
    pub fn get(&self, session_id: &SessionId) -> Result<SessionRecord, SessionError> {
        let conn = self.conn()?;
        let record = SessionRepository::get(&conn, session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if record.status == SessionStatus::Gone {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        Ok(record)
    }

    /// List sessions.
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>, SessionError> {
        let conn = self.conn()?;
        Ok(SessionRepository::list(&conn, filter)?)
    }

    /// Whether a session has a live executor.
    #[must_use]
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    /// Subscribe to a session's events from an offset.
    pub fn subscribe(
        &self,
        session_id: &SessionId,
        from_seq: u64,
        channel_capacity: Option<usize>,
    ) -> Result<Subscription, SessionError> {
        let _ = self.get(session_id)?;
        let bus = self.bus_for(session_id);
        Ok(match channel_capacity {
            Some(capacity) => bus.subscribe_with_capacity(from_seq, capacity),
            None => bus.subscribe(from_seq),
        })
    }

    /// Synchronous event pull with bounded wait.
    pub async fn events(
        &self,
        session_id: &SessionId,
        from_seq: u64,
        max: usize,
        wait: bool,
    ) -> Result<(Vec<StreamEvent>, u64), SessionError> {
        let _ = self.get(session_id)?;
        let bus = self.bus_for(session_id);
        let timeout = std::time::Duration::from_secs(
            oubliette_core::constants::EVENTS_WAIT_TIMEOUT_SECS,
        );
        Ok(bus.events_since(from_seq, max, wait, timeout).await)
    }

    /// Detach every active session; called on server shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.end(&id).await {
                warn!(session = %id, error = %e, "failed to detach session on shutdown");
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn conn(&self) -> Result<oubliette_store::PooledConnection, SessionError> {
        self.pool
            .get()
            .map_err(|e| SessionError::Store(oubliette_store::StoreError::Pool(e)))
    }

    fn project_lock(&self, project_id: &ProjectId) -> Arc<AsyncMutex<()>> {
        self.project_locks
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn bus_for(&self, session_id: &SessionId) -> Arc<SessionBus> {
        self.buses
            .entry(session_id.clone())
            .or_insert_with(|| {
                Arc::new(SessionBus::with_capacity(
                    session_id.clone(),
                    self.ring_capacity,
                ))
            })
            .clone()
    }

    /// Depth and fan-out checks; both must pass atomically (the caller
    /// holds the project lock). Returns the new session's depth.
    fn check_caps(&self, opts: &SpawnOptions) -> Result<u32, SessionError> {
        let conn = self.conn()?;
        let limits = &opts.project.limits;

        let depth = match &opts.parent_session_id {
            None => 0,
            Some(parent_id) => {
                let parent = SessionRepository::get(&conn, parent_id)?
                    .ok_or_else(|| SessionError::InvalidParent(parent_id.to_string()))?;
                if parent.project_id != opts.project.id || parent.status == SessionStatus::Gone {
                    return Err(SessionError::InvalidParent(parent_id.to_string()));
                }
                parent.depth + 1
            }
        };
        if depth >= limits.max_recursion_depth {
            return Err(SessionError::LimitExceeded(format!(
                "recursion depth {depth} reaches the project cap {}",
                limits.max_recursion_depth
            )));
        }

        if let Some(parent_id) = &opts.parent_session_id {
            // Fan-out: live sessions in the parent's tree, new child included.
            let all = SessionRepository::list(
                &conn,
                &SessionFilter {
                    project_id: Some(opts.project.id.clone()),
                    live_only: false,
                    limit: None,
                },
            )?;
            let parents: HashMap<&SessionId, Option<&SessionId>> = all
                .iter()
                .map(|r| (&r.id, r.parent_session_id.as_ref()))
                .collect();
            let root = tree_root(&parents, parent_id);
            let live_in_tree = all
                .iter()
                .filter(|r| {
                    matches!(r.status, SessionStatus::Active | SessionStatus::Cancelling)
                        && tree_root(&parents, &r.id) == root
                })
                .count();
            if live_in_tree + 1 > limits.max_agents_per_session as usize {
                return Err(SessionError::LimitExceeded(format!(
                    "session tree already has {live_in_tree} live agents (cap {})",
                    limits.max_agents_per_session
                )));
            }
        }

        Ok(depth)
    }

    /// Wire an executor's event stream onto the session's bus. The pump
    /// task owns only clones of the shared state, so it never keeps the
    /// manager itself alive.
    fn attach(
        &self,
        session_id: &SessionId,
        executor: Arc<dyn StreamingExecutor>,
        bus: &Arc<SessionBus>,
    ) -> Result<(), SessionError> {
        let mut events = executor.take_events().ok_or_else(|| {
            SessionError::Agent(AgentError::Backend("executor events already taken".into()))
        })?;

        let _ = self.active.insert(
            session_id.clone(),
            Arc::new(ActiveSession {
                executor,
                bus: bus.clone(),
            }),
        );

        let active = self.active.clone();
        let pool = self.pool.clone();
        let session_id = session_id.clone();
        let bus = bus.clone();
        let _ = tokio::spawn(async move {
            while let Some(AgentEvent { kind, raw }) = events.recv().await {
                let event = bus.publish(kind, raw);
                observe(&pool, &session_id, &event);
            }
            // Stream ended: the session detaches but stays resumable.
            if active.remove(&session_id).is_some() {
                if let Ok(conn) = pool.get() {
                    let _ = SessionRepository::set_status(
                        &conn,
                        &session_id,
                        SessionStatus::Detached,
                    );
                }
            }
            bus.close();
            debug!(session = %session_id, "event pump finished");
        });
        Ok(())
    }
}

/// Bookkeeping on observed events: activity stamps and the
/// cancelling→active transition.
fn observe(pool: &ConnectionPool, session_id: &SessionId, event: &StreamEvent) {
    match &event.kind {
        StreamEventKind::Completion { .. } | StreamEventKind::Error { .. } => {
            if let Ok(conn) = pool.get() {
                let _ = SessionRepository::touch(&conn, session_id);
            }
        }
        StreamEventKind::System { subtype, .. } if subtype == "cancelled" => {
            // Interrupt acknowledged; the session stays alive for the
            // next turn.
            if let Ok(conn) = pool.get() {
                if let Ok(Some(record)) = SessionRepository::get(&conn, session_id) {
                    if record.status == SessionStatus::Cancelling {
                        let _ = SessionRepository::set_status(
                            &conn,
                            session_id,
                            SessionStatus::Active,
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

fn map_launch_error(e: AgentError) -> SessionError {
    match e {
        AgentError::Unavailable(message) => SessionError::ContainerUnavailable(message),
        other => SessionError::Agent(other),
    }
}

fn tree_root<'a>(
    parents: &HashMap<&'a SessionId, Option<&'a SessionId>>,
    id: &'a SessionId,
) -> &'a SessionId {
    let mut current = id;
    let mut hops = 0;
    while let Some(parent) = parents.get(current).copied().flatten() {
        current = parent;
        hops += 1;
        if hops > 1024 {
            break;
        }
    }
    current
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
