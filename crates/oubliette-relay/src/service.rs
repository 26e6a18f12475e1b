//! The relay service: per-project UNIX listeners, connection registry, and
//! caller-tool forwarding.
//!
//! Authentication is the socket itself: only the project's container can
//! reach it. The handler trusts the identity triplet only as far as the
//! host provisioned it: the project in the params must match the socket the
//! call arrived on, and scope checks run against the *stored* creator scope
//! via the dispatcher, never against anything the container claims.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use oubliette_core::{ProjectId, SessionId};

use crate::errors::RelayError;
use crate::wire::{RpcRequest, RpcResponse};

/// Default deadline for a forwarded caller-tool call.
const CALLER_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Who is calling, as provisioned at spawn time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayIdentity {
    /// The in-container session.
    pub session_id: SessionId,
    /// Its project.
    pub project_id: ProjectId,
    /// Its spawn depth.
    pub depth: u32,
}

impl RelayIdentity {
    /// Extract the identity triplet from request params.
    pub fn from_params(params: Option<&Value>) -> Result<Self, RelayError> {
        let params = params.ok_or_else(|| {
            RelayError::InvalidRequest("missing params".into())
        })?;
        let session_id = params
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidRequest("missing session_id".into()))?;
        let project_id = params
            .get("project_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidRequest("missing project_id".into()))?;
        let depth = params
            .get("depth")
            .and_then(Value::as_u64)
            .ok_or_else(|| RelayError::InvalidRequest("missing depth".into()))?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self {
            session_id: SessionId::from(session_id),
            project_id: ProjectId::from(project_id),
            depth: depth as u32,
        })
    }
}

/// Host-side hooks the relay dispatches into. Implemented by the MCP
/// server layer; every call re-authorizes against the session's stored
/// creator scope.
#[async_trait]
pub trait RelayDispatcher: Send + Sync {
    /// Tool definitions the session's scope permits.
    async fn list_tools(&self, identity: &RelayIdentity) -> Result<Value, RelayError>;

    /// Invoke a named tool with arguments.
    async fn call_tool(
        &self,
        identity: &RelayIdentity,
        tool: &str,
        args: Value,
    ) -> Result<Value, RelayError>;

    /// The project's recursion-depth cap, for the relay-boundary gate.
    fn max_recursion_depth(&self, project: &ProjectId) -> Option<u32>;

    /// Whether a tool spawns another session (subject to the depth gate).
    fn is_spawning_tool(&self, tool: &str) -> bool;
}

/// A caller-tool manifest: which tools a session's spawner exposed to it.
#[derive(Clone, Debug)]
pub struct CallerManifest {
    /// The spawning session the calls forward to.
    pub caller_session: SessionId,
    /// Tool names the caller offered.
    pub tools: Vec<String>,
}

struct ProjectRelay {
    cancel: CancellationToken,
    socket_dir: PathBuf,
}

/// One relay service per process, managing every project's socket.
/// Cloning is cheap and shares all state; connection tasks carry their
/// own handle.
#[derive(Clone)]
pub struct RelayService {
    dispatcher: Arc<dyn RelayDispatcher>,
    servers: Arc<DashMap<ProjectId, ProjectRelay>>,
    connections: Arc<DashMap<SessionId, Arc<ConnectionHandle>>>,
    manifests: Arc<DashMap<SessionId, CallerManifest>>,
}

impl RelayService {
    /// Create a service over a dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn RelayDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            servers: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
            manifests: Arc::new(DashMap::new()),
        })
    }

    /// Bring up a project's socket. The directory is recreated, removing
    /// any stale socket from a previous run. Returns the socket path.
    pub fn start_project(
        &self,
        project_id: &ProjectId,
        socket_dir: &Path,
    ) -> Result<PathBuf, RelayError> {
        if let Some(existing) = self.servers.get(project_id) {
            return Ok(existing.socket_dir.join(oubliette_core::constants::RELAY_SOCKET_NAME));
        }

        if socket_dir.exists() {
            std::fs::remove_dir_all(socket_dir)?;
        }
        std::fs::create_dir_all(socket_dir)?;
        let socket_path = socket_dir.join(oubliette_core::constants::RELAY_SOCKET_NAME);

        let listener = UnixListener::bind(&socket_path)?;
        let cancel = CancellationToken::new();
        let _ = self.servers.insert(
            project_id.clone(),
            ProjectRelay {
                cancel: cancel.clone(),
                socket_dir: socket_dir.to_path_buf(),
            },
        );

        let service = self.clone();
        let project = project_id.clone();
        let _ = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, _)) => {
                        let service = service.clone();
                        let project = project.clone();
                        let cancel = cancel.clone();
                        let _ = tokio::spawn(async move {
                            service.run_connection(stream, project, cancel).await;
                        });
                    }
                    Err(e) => {
                        warn!(project = %project, error = %e, "relay accept failed");
                        break;
                    }
                }
            }
            debug!(project = %project, "relay listener stopped");
        });

        info!(project = %project_id, path = %socket_path.display(), "relay socket up");
        Ok(socket_path)
    }

    /// Tear down a project's socket and remove its directory.
    pub fn stop_project(&self, project_id: &ProjectId) -> Result<(), RelayError> {
        if let Some((_, relay)) = self.servers.remove(project_id) {
            relay.cancel.cancel();
            if relay.socket_dir.exists() {
                std::fs::remove_dir_all(&relay.socket_dir)?;
            }
            info!(project = %project_id, "relay socket removed");
        }
        Ok(())
    }

    /// Record the caller-tool manifest for a freshly spawned session.
    pub fn register_caller_tools(
        &self,
        session: &SessionId,
        caller_session: &SessionId,
        tools: Vec<String>,
    ) {
        let _ = self.manifests.insert(
            session.clone(),
            CallerManifest {
                caller_session: caller_session.clone(),
                tools,
            },
        );
    }

    /// Drop a session's manifest and connection entry (session ended).
    pub fn forget_session(&self, session: &SessionId) {
        let _ = self.manifests.remove(session);
        let _ = self.connections.remove(session);
    }

    /// The caller-tool manifest for a session, if any.
    #[must_use]
    pub fn manifest(&self, session: &SessionId) -> Option<CallerManifest> {
        self.manifests.get(session).map(|m| m.clone())
    }

    async fn run_connection(
        self,
        stream: UnixStream,
        project: ProjectId,
        cancel: CancellationToken,
    ) {
        let (read_half, write_half) = stream.into_split();
        let handle = Arc::new(ConnectionHandle::new(write_half));
        let mut lines = BufReader::new(read_half).lines();
        let mut bound_session: Option<SessionId> = None;

        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "relay connection read failed");
                    break;
                }
            };

            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                warn!("undecodable relay line, dropping");
                continue;
            };

            if value.get("method").is_some() {
                let Ok(request) = serde_json::from_value::<RpcRequest>(value) else {
                    warn!("malformed relay request, dropping");
                    continue;
                };
                // First identified request binds this connection to its
                // session so forwarded caller calls can find it.
                if bound_session.is_none() {
                    if let Ok(identity) = RelayIdentity::from_params(request.params.as_ref()) {
                        let _ = self
                            .connections
                            .insert(identity.session_id.clone(), handle.clone());
                        bound_session = Some(identity.session_id);
                    }
                }
                let service = self.clone();
                let handle = handle.clone();
                let project = project.clone();
                let _ = tokio::spawn(async move {
                    service.handle_request(request, &project, &handle).await;
                });
            } else {
                // A response to a forwarded caller-tool call.
                if let Ok(response) = serde_json::from_value::<RpcResponse>(value) {
                    handle.fulfill(response);
                }
            }
        }

        if let Some(session) = bound_session {
            let _ = self.connections.remove(&session);
        }
    }

    async fn handle_request(
        &self,
        request: RpcRequest,
        socket_project: &ProjectId,
        handle: &Arc<ConnectionHandle>,
    ) {
        let id = request.id.clone();
        let result = self.dispatch(&request, socket_project).await;

        // Notifications get no response.
        let Some(id) = id else { return };
        let response = match result {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => {
                debug!(method = %request.method, error = %error, "relay call failed");
                RpcResponse::failure(id, &error)
            }
        };
        if let Err(e) = handle.write_line(&response).await {
            warn!(error = %e, "relay response write failed");
        }
    }

    async fn dispatch(
        &self,
        request: &RpcRequest,
        socket_project: &ProjectId,
    ) -> Result<Value, RelayError> {
        let identity = RelayIdentity::from_params(request.params.as_ref())?;
        // The socket is the authentication boundary; an identity naming a
        // different project is lying.
        if &identity.project_id != socket_project {
            return Err(RelayError::Denied(format!(
                "identity project {} does not match socket project {socket_project}",
                identity.project_id
            )));
        }

        match request.method.as_str() {
            "heartbeat" => Ok(json!({"ok": true})),
            "oubliette_tools" => self.dispatcher.list_tools(&identity).await,
            "oubliette_call_tool" => {
                let params = request.params.as_ref().ok_or_else(|| {
                    RelayError::InvalidRequest("missing params".into())
                })?;
                let tool = params
                    .get("tool")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::InvalidRequest("missing tool".into()))?;
                let args = params.get("arguments").cloned().unwrap_or(json!({}));

                // Depth violations are stopped here, before any child
                // container is touched.
                if self.dispatcher.is_spawning_tool(tool) {
                    if let Some(max) = self.dispatcher.max_recursion_depth(&identity.project_id) {
                        if identity.depth + 1 >= max {
                            return Err(RelayError::DepthExceeded(format!(
                                "session at depth {} cannot spawn (cap {max})",
                                identity.depth
                            )));
                        }
                    }
                }
                self.dispatcher.call_tool(&identity, tool, args).await
            }
            "caller_tool_call" => self.forward_caller_call(&identity, request).await,
            other => Err(RelayError::UnknownMethod(other.to_owned())),
        }
    }

    /// Forward a call up the spawn chain to the caller's connection.
    async fn forward_caller_call(
        &self,
        identity: &RelayIdentity,
        request: &RpcRequest,
    ) -> Result<Value, RelayError> {
        let manifest = self
            .manifest(&identity.session_id)
            .ok_or_else(|| RelayError::NoCaller(identity.session_id.to_string()))?;

        let params = request
            .params
            .as_ref()
            .ok_or_else(|| RelayError::InvalidRequest("missing params".into()))?;
        let tool = params
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidRequest("missing tool".into()))?;
        if !manifest.tools.iter().any(|t| t == tool) {
            return Err(RelayError::Denied(format!(
                "tool '{tool}' is not in the caller manifest"
            )));
        }

        let caller = self
            .connections
            .get(&manifest.caller_session)
            .map(|c| c.clone())
            .ok_or_else(|| {
                RelayError::CallerUnavailable(manifest.caller_session.to_string())
            })?;

        let forwarded = json!({
            "tool": tool,
            "arguments": params.get("arguments").cloned().unwrap_or(json!({})),
            "from_session": identity.session_id,
        });
        caller
            .call("caller_tool_call", forwarded, CALLER_CALL_TIMEOUT)
            .await
    }
}

/// Write half of one relay connection, shared by concurrent request tasks
/// and by forwarded calls from child sessions.
struct ConnectionHandle {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: DashMap<String, oneshot::Sender<RpcResponse>>,
    counter: AtomicU64,
}

impl ConnectionHandle {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            pending: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    async fn write_line(&self, value: &impl serde::Serialize) -> std::io::Result<()> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    /// Issue a server→client request on this connection and await the
    /// correlated response.
    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let id = format!("relay-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id.clone(), tx);

        let request = RpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.write_line(&request).await {
            let _ = self.pending.remove(&id);
            return Err(RelayError::Io(e));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                let _ = self.pending.remove(&id);
                return Err(RelayError::CallerUnavailable(
                    "forwarded call timed out".into(),
                ));
            }
        };

        if let Some(error) = response.error {
            return Err(RelayError::dispatch(
                oubliette_core::ErrorKind::Internal,
                error.message,
            ));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn fulfill(&self, response: RpcResponse) {
        let Some(id) = response.id.as_str().map(str::to_owned) else {
            return;
        };
        if let Some((_, tx)) = self.pending.remove(&id) {
            let _ = tx.send(response);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
