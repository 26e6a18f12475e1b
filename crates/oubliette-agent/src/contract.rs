//! The `AgentRuntime` / `StreamingExecutor` contracts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oubliette_core::config::Reasoning;
use oubliette_core::events::StreamEventKind;
use oubliette_core::{ProjectId, SessionId};

use crate::errors::AgentError;

/// One normalized event as produced by an executor. The session bus assigns
/// sequence numbers and timestamps when it accepts the event.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentEvent {
    /// Normalized payload.
    pub kind: StreamEventKind,
    /// The backend's raw wire payload, preserved for observability.
    pub raw: Value,
}

impl AgentEvent {
    /// Build an event with no raw payload (fakes, synthesized signals).
    #[must_use]
    pub fn bare(kind: StreamEventKind) -> Self {
        Self {
            kind,
            raw: Value::Null,
        }
    }
}

/// Inputs for starting (or resuming) a streaming session.
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    /// Owning project, for env propagation and server routing.
    pub project_id: ProjectId,
    /// Our session ID, propagated into the agent's environment.
    pub session_id: SessionId,
    /// Spawn depth, propagated into the agent's environment.
    pub depth: u32,
    /// Working directory inside the container.
    pub working_dir: PathBuf,
    /// Model identifier.
    pub model: String,
    /// Reasoning effort forwarded per message.
    pub reasoning: Reasoning,
    /// First prompt; empty means attach without sending.
    pub initial_prompt: Option<String>,
    /// Backend session to resume; `None` starts fresh.
    pub resume_runtime_session_id: Option<String>,
    /// Extra environment for the agent process (identity triplet, etc.).
    pub env: HashMap<String, String>,
}

/// Live handle to one running agent session.
///
/// Events arrive on the channel returned by [`take_events`], which yields
/// `None` once per executor (the session manager's pump owns the receiver).
/// Stream-level failures are delivered as an `error` event *and* by
/// cancelling [`done`]; `wait` then reports the exit code and error text.
///
/// [`take_events`]: StreamingExecutor::take_events
/// [`done`]: StreamingExecutor::done
#[async_trait]
pub trait StreamingExecutor: Send + Sync {
    /// Send a user message into the running session.
    async fn send_message(
        &self,
        text: &str,
        reasoning: Option<Reasoning>,
    ) -> Result<(), AgentError>;

    /// Request a soft interrupt. Idempotent; completion is observed via a
    /// `system{subtype=cancelled}` event or `done`.
    async fn cancel(&self) -> Result<(), AgentError>;

    /// Take the event receiver. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::Receiver<AgentEvent>>;

    /// Token cancelled when the executor finishes or dies.
    fn done(&self) -> CancellationToken;

    /// Wait for termination; returns (exit code, error text).
    async fn wait(&self) -> (i32, Option<String>);

    /// Close the executor and release backend resources.
    async fn close(&self) -> Result<(), AgentError>;

    /// The backend-assigned session ID, once known.
    fn runtime_session_id(&self) -> Option<String>;

    /// Whether `close` has run (or the stream died).
    fn is_closed(&self) -> bool;
}

impl std::fmt::Debug for dyn StreamingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingExecutor")
            .field("runtime_session_id", &self.runtime_session_id())
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

/// A backend capable of running agent sessions.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Prepare the backend. Idempotent.
    async fn initialize(&self) -> Result<(), AgentError>;

    /// Start a new or resumed session. On success the executor is already
    /// subscribed to the event stream and accepts `send_message`.
    async fn execute_streaming(
        &self,
        req: ExecuteRequest,
    ) -> Result<Arc<dyn StreamingExecutor>, AgentError>;

    /// Backend health.
    async fn ping(&self) -> Result<(), AgentError>;
}

/// Environment variable carrying our session ID into the container.
pub const ENV_SESSION_ID: &str = "OUBLIETTE_SESSION_ID";
/// Environment variable carrying the project ID into the container.
pub const ENV_PROJECT_ID: &str = "OUBLIETTE_PROJECT_ID";
/// Environment variable carrying the spawn depth into the container.
pub const ENV_DEPTH: &str = "OUBLIETTE_DEPTH";

impl ExecuteRequest {
    /// The identity triplet provisioned into the agent's environment; the
    /// in-container proxy echoes these on every relay call.
    #[must_use]
    pub fn identity_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        let _ = env.insert(ENV_SESSION_ID.to_owned(), self.session_id.to_string());
        let _ = env.insert(ENV_PROJECT_ID.to_owned(), self.project_id.to_string());
        let _ = env.insert(ENV_DEPTH.to_owned(), self.depth.to_string());
        env
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
