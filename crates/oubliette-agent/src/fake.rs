//! Scripted in-memory agent runtime for tests.
//!
//! Each spawned executor plays a configurable turn script (default: one
//! assistant message plus a completion) on the initial prompt and again on
//! every `send_message`. The runtime records calls so tests can assert on
//! invocation counts and spawn inputs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oubliette_core::config::Reasoning;
use oubliette_core::events::{Role, StreamEventKind};

use crate::contract::{AgentEvent, AgentRuntime, ExecuteRequest, StreamingExecutor};
use crate::errors::AgentError;

/// Scripted [`AgentRuntime`].
#[derive(Default)]
pub struct FakeAgentRuntime {
    counter: AtomicUsize,
    execute_requests: Mutex<Vec<ExecuteRequest>>,
    known_sessions: Mutex<HashSet<String>>,
    spawn_delay: Mutex<Duration>,
    fail_next: Mutex<Option<String>>,
    turn_script: Mutex<Option<Vec<AgentEvent>>>,
    executors: Mutex<Vec<Arc<FakeExecutor>>>,
}

impl FakeAgentRuntime {
    /// Create a fake with the default turn script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the per-turn event script.
    pub fn script_turn(&self, events: Vec<AgentEvent>) {
        *self.turn_script.lock() = Some(events);
    }

    /// Delay every `execute_streaming` call (overlap tests).
    pub fn set_spawn_delay(&self, delay: Duration) {
        *self.spawn_delay.lock() = delay;
    }

    /// Make the next `execute_streaming` fail with `Unavailable`.
    pub fn fail_next_execute(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_owned());
    }

    /// How many times `execute_streaming` ran.
    pub fn execute_calls(&self) -> usize {
        self.execute_requests.lock().len()
    }

    /// Copies of every spawn request seen.
    pub fn requests(&self) -> Vec<ExecuteRequest> {
        self.execute_requests.lock().clone()
    }

    /// Every executor handed out, in creation order.
    pub fn executors(&self) -> Vec<Arc<FakeExecutor>> {
        self.executors.lock().clone()
    }

    /// Forget a runtime session, so resuming it fails `SessionDiscarded`.
    pub fn discard_session(&self, runtime_session_id: &str) {
        let _ = self.known_sessions.lock().remove(runtime_session_id);
    }

    fn default_script() -> Vec<AgentEvent> {
        vec![
            AgentEvent {
                kind: StreamEventKind::Message {
                    role: Role::Assistant,
                    text: "ack".to_owned(),
                },
                raw: Value::Null,
            },
            AgentEvent {
                kind: StreamEventKind::Completion { stop_reason: Some("end_turn".to_owned()) },
                raw: Value::Null,
            },
        ]
    }
}

#[async_trait]
impl AgentRuntime for FakeAgentRuntime {
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn execute_streaming(
        &self,
        req: ExecuteRequest,
    ) -> Result<Arc<dyn StreamingExecutor>, AgentError> {
        let delay = *self.spawn_delay.lock();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_next.lock().take() {
            return Err(AgentError::Unavailable(message));
        }

        let runtime_session_id = match &req.resume_runtime_session_id {
            Some(resume_id) => {
                if !self.known_sessions.lock().contains(resume_id) {
                    return Err(AgentError::SessionDiscarded(resume_id.clone()));
                }
                resume_id.clone()
            }
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let id = format!("rt-{n}");
                let _ = self.known_sessions.lock().insert(id.clone());
                id
            }
        };

        let script = self
            .turn_script
            .lock()
            .clone()
            .unwrap_or_else(Self::default_script);
        let executor = FakeExecutor::new(runtime_session_id, script);

        if req.initial_prompt.as_deref().is_some_and(|p| !p.is_empty()) {
            executor.play_turn().await;
        }

        self.execute_requests.lock().push(req);
        self.executors.lock().push(executor.clone());
        Ok(executor)
    }

    async fn ping(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Scripted [`StreamingExecutor`].
pub struct FakeExecutor {
    runtime_session_id: String,
    script: Vec<AgentEvent>,
    sender: Mutex<Option<mpsc::Sender<AgentEvent>>>,
    events: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    done: CancellationToken,
    closed: AtomicBool,
    messages: Mutex<Vec<String>>,
    cancel_calls: AtomicUsize,
}

impl FakeExecutor {
    fn new(runtime_session_id: String, script: Vec<AgentEvent>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(2048);
        Arc::new(Self {
            runtime_session_id,
            script,
            sender: Mutex::new(Some(tx)),
            events: Mutex::new(Some(rx)),
            done: CancellationToken::new(),
            closed: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            cancel_calls: AtomicUsize::new(0),
        })
    }

    /// Messages received via `send_message`, in order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// How many times `cancel` ran.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Inject one event into the stream (lag and normalization tests).
    pub async fn emit(&self, event: AgentEvent) {
        let sender = self.sender.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Emit the scripted turn.
    pub async fn play_turn(&self) {
        let script = self.script.clone();
        for event in script {
            self.emit(event).await;
        }
    }

    /// Simulate the backend process dying with an error.
    pub async fn fail_stream(&self, message: &str) {
        self.emit(AgentEvent::bare(StreamEventKind::Error {
            message: message.to_owned(),
        }))
        .await;
        let _ = self.sender.lock().take();
        self.done.cancel();
    }
}

#[async_trait]
impl StreamingExecutor for FakeExecutor {
    async fn send_message(
        &self,
        text: &str,
        _reasoning: Option<Reasoning>,
    ) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        self.messages.lock().push(text.to_owned());
        self.play_turn().await;
        Ok(())
    }

    async fn cancel(&self) -> Result<(), AgentError> {
        let _ = self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.emit(AgentEvent::bare(StreamEventKind::System {
            subtype: "cancelled".to_owned(),
            text: None,
        }))
        .await;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.events.lock().take()
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    async fn wait(&self) -> (i32, Option<String>) {
        self.done.cancelled().await;
        (0, None)
    }

    async fn close(&self) -> Result<(), AgentError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.sender.lock().take();
        self.done.cancel();
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
