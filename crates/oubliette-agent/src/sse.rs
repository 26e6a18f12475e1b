//! HTTP+SSE agent backend.
//!
//! One long-lived backend server per project container, started lazily by a
//! [`BackendLauncher`] on the first `execute_streaming` and health-polled
//! with a bounded timeout. All sessions of a project share the server's
//! single SSE event stream; a sessions map keyed by the backend's session ID
//! routes each raw event to the right executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use eventsource_stream::Eventsource;
use oubliette_core::config::Reasoning;
use oubliette_core::ProjectId;

use crate::contract::{AgentEvent, AgentRuntime, ExecuteRequest, StreamingExecutor};
use crate::errors::AgentError;
use crate::normalize::Normalizer;

/// Tuning for backend server management.
#[derive(Clone, Debug)]
pub struct SseRuntimeConfig {
    /// How long to wait for a launched server to pass its health poll.
    pub health_timeout: Duration,
    /// Poll interval during the health wait.
    pub health_poll_interval: Duration,
}

impl Default for SseRuntimeConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(30),
            health_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Brings a per-project backend server up and down. The production
/// implementation execs the server inside the project's container; tests
/// point at a local HTTP server.
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    /// Start (or find) the project's backend server; returns its base URL.
    async fn launch(&self, project: &ProjectId) -> Result<String, AgentError>;

    /// Tear the server down. Called when the project's container stops.
    async fn terminate(&self, project: &ProjectId) -> Result<(), AgentError>;
}

type RawSender = mpsc::Sender<Value>;

struct BackendServer {
    base_url: String,
    sessions: Arc<DashMap<String, RawSender>>,
    reader_cancel: CancellationToken,
}

impl Drop for BackendServer {
    fn drop(&mut self) {
        self.reader_cancel.cancel();
    }
}

/// The HTTP+SSE [`AgentRuntime`].
pub struct SseRuntime {
    client: reqwest::Client,
    launcher: Arc<dyn BackendLauncher>,
    config: SseRuntimeConfig,
    servers: DashMap<ProjectId, Arc<BackendServer>>,
}

impl SseRuntime {
    /// Create a runtime over a launcher.
    #[must_use]
    pub fn new(launcher: Arc<dyn BackendLauncher>, config: SseRuntimeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            launcher,
            config,
            servers: DashMap::new(),
        }
    }

    /// Drop a project's server handle (container stopped). The reader task
    /// stops; registered executors observe their streams closing.
    pub async fn drop_server(&self, project: &ProjectId) {
        if let Some((_, server)) = self.servers.remove(project) {
            server.reader_cancel.cancel();
            if let Err(e) = self.launcher.terminate(project).await {
                warn!(project = %project, error = %e, "backend terminate failed");
            }
        }
    }

    async fn ensure_server(&self, project: &ProjectId) -> Result<Arc<BackendServer>, AgentError> {
        if let Some(server) = self.servers.get(project) {
            return Ok(server.clone());
        }

        let base_url = self.launcher.launch(project).await?;
        self.wait_healthy(&base_url).await?;

        let sessions: Arc<DashMap<String, RawSender>> = Arc::new(DashMap::new());
        let reader_cancel = CancellationToken::new();
        spawn_reader(
            self.client.clone(),
            base_url.clone(),
            sessions.clone(),
            reader_cancel.clone(),
        );

        let server = Arc::new(BackendServer {
            base_url,
            sessions,
            reader_cancel,
        });
        let _ = self.servers.insert(project.clone(), server.clone());
        Ok(server)
    }

    async fn wait_healthy(&self, base_url: &str) -> Result<(), AgentError> {
        let deadline = tokio::time::Instant::now() + self.config.health_timeout;
        loop {
            match self.client.get(format!("{base_url}/health")).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ if tokio::time::Instant::now() >= deadline => {
                    return Err(AgentError::Unavailable(format!(
                        "backend at {base_url} failed health poll"
                    )));
                }
                _ => tokio::time::sleep(self.config.health_poll_interval).await,
            }
        }
    }

    async fn open_session(&self, req: &ExecuteRequest, base_url: &str) -> Result<String, AgentError> {
        if let Some(resume_id) = &req.resume_runtime_session_id {
            let resp = self
                .client
                .get(format!("{base_url}/session/{resume_id}"))
                .send()
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AgentError::SessionDiscarded(resume_id.clone()));
            }
            if !resp.status().is_success() {
                return Err(AgentError::Backend(format!(
                    "resume probe returned {}",
                    resp.status()
                )));
            }
            return Ok(resume_id.clone());
        }

        let body = json!({
            "model": req.model,
            "workingDir": req.working_dir,
            "env": req.identity_env(),
        });
        let resp = self
            .client
            .post(format!("{base_url}/session"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AgentError::Backend(format!(
                "session create returned {}",
                resp.status()
            )));
        }
        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Backend(format!("bad session create body: {e}")))?;
        parsed
            .get("sessionID")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AgentError::Backend("session create body missing sessionID".into()))
    }
}

#[async_trait]
impl AgentRuntime for SseRuntime {
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn execute_streaming(
        &self,
        req: ExecuteRequest,
    ) -> Result<Arc<dyn StreamingExecutor>, AgentError> {
        let server = self.ensure_server(&req.project_id).await?;
        let runtime_session_id = self.open_session(&req, &server.base_url).await?;

        let (raw_tx, raw_rx) = mpsc::channel::<Value>(256);
        let _ = server
            .sessions
            .insert(runtime_session_id.clone(), raw_tx);

        let executor = SseExecutor::new(
            self.client.clone(),
            server.base_url.clone(),
            runtime_session_id.clone(),
            server.sessions.clone(),
            raw_rx,
        );

        if let Some(prompt) = req.initial_prompt.as_deref() {
            if !prompt.is_empty() {
                executor.send_message(prompt, Some(req.reasoning)).await?;
            }
        }

        debug!(
            session = %req.session_id,
            runtime_session = %runtime_session_id,
            "sse executor attached"
        );
        Ok(executor)
    }

    async fn ping(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Reads the server's shared SSE stream and routes events by session ID.
fn spawn_reader(
    client: reqwest::Client,
    base_url: String,
    sessions: Arc<DashMap<String, RawSender>>,
    cancel: CancellationToken,
) {
    let _ = tokio::spawn(async move {
        let result = read_stream(&client, &base_url, &sessions, &cancel).await;
        if let Err(e) = result {
            warn!(base_url, error = %e, "sse stream died");
            // Tell every registered executor the stream is gone, then close
            // their channels by dropping the senders.
            let synthesized = json!({"type": "session.error", "error": format!("event stream lost: {e}")});
            for entry in sessions.iter() {
                let _ = entry.value().try_send(synthesized.clone());
            }
        }
        sessions.clear();
    });
}

async fn read_stream(
    client: &reqwest::Client,
    base_url: &str,
    sessions: &DashMap<String, RawSender>,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let resp = client.get(format!("{base_url}/event")).send().await?;
    if !resp.status().is_success() {
        return Err(AgentError::Backend(format!(
            "event stream returned {}",
            resp.status()
        )));
    }
    let mut stream = resp.bytes_stream().eventsource();

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            event = stream.next() => event,
        };
        let Some(event) = event else {
            return Err(AgentError::Transport("event stream closed".into()));
        };
        let event = event.map_err(|e| AgentError::Transport(e.to_string()))?;
        let Ok(raw) = serde_json::from_str::<Value>(&event.data) else {
            continue;
        };
        let Some(session_id) = raw.get("sessionID").and_then(Value::as_str) else {
            continue;
        };
        if let Some(sender) = sessions.get(session_id) {
            // A stuck executor loses raw events rather than stalling every
            // other session on this server.
            if sender.try_send(raw.clone()).is_err() {
                warn!(session_id, "executor raw channel full, dropping event");
            }
        }
    }
}

/// Executor over one backend session.
pub struct SseExecutor {
    client: reqwest::Client,
    base_url: String,
    runtime_session_id: String,
    sessions: Arc<DashMap<String, RawSender>>,
    events: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    done: CancellationToken,
    closed: AtomicBool,
    exit: watch::Receiver<Option<(i32, Option<String>)>>,
}

impl SseExecutor {
    fn new(
        client: reqwest::Client,
        base_url: String,
        runtime_session_id: String,
        sessions: Arc<DashMap<String, RawSender>>,
        mut raw_rx: mpsc::Receiver<Value>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(256);
        let (exit_tx, exit_rx) = watch::channel(None);
        let done = CancellationToken::new();

        {
            let done = done.clone();
            let _ = tokio::spawn(async move {
                let mut normalizer = Normalizer::new();
                let mut error_text: Option<String> = None;
                while let Some(raw) = raw_rx.recv().await {
                    if let Some(event) = normalizer.push(&raw) {
                        if let oubliette_core::events::StreamEventKind::Error { message } =
                            &event.kind
                        {
                            error_text = Some(message.clone());
                        }
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                let code = i32::from(error_text.is_some());
                let _ = exit_tx.send(Some((code, error_text)));
                done.cancel();
            });
        }

        Arc::new(Self {
            client,
            base_url,
            runtime_session_id,
            sessions,
            events: Mutex::new(Some(event_rx)),
            done,
            closed: AtomicBool::new(false),
            exit: exit_rx,
        })
    }
}

#[async_trait]
impl StreamingExecutor for SseExecutor {
    async fn send_message(
        &self,
        text: &str,
        reasoning: Option<Reasoning>,
    ) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        let mut body = HashMap::new();
        let _ = body.insert("text".to_owned(), json!(text));
        if let Some(reasoning) = reasoning {
            let _ = body.insert("reasoning".to_owned(), json!(reasoning));
        }
        let resp = self
            .client
            .post(format!(
                "{}/session/{}/message",
                self.base_url, self.runtime_session_id
            ))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AgentError::Backend(format!(
                "message returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), AgentError> {
        let resp = self
            .client
            .post(format!(
                "{}/session/{}/abort",
                self.base_url, self.runtime_session_id
            ))
            .send()
            .await?;
        // Aborting an idle or already-aborted session is not an error.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
            return Err(AgentError::Backend(format!(
                "abort returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.events.lock().take()
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    async fn wait(&self) -> (i32, Option<String>) {
        let mut exit = self.exit.clone();
        loop {
            if let Some(result) = exit.borrow().clone() {
                return result;
            }
            if exit.changed().await.is_err() {
                return (0, None);
            }
        }
    }

    async fn close(&self) -> Result<(), AgentError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the raw sender ends the normalize task, which cancels done.
        let _ = self.sessions.remove(&self.runtime_session_id);
        Ok(())
    }

    fn runtime_session_id(&self) -> Option<String> {
        Some(self.runtime_session_id.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
