//! The normalized event model.
//!
//! Every agent backend's wire events are reduced to [`StreamEvent`] before
//! anything downstream sees them. Events are append-only within a session
//! and strictly monotonic in `seq`. The `raw` field preserves the backend
//! payload for observability; business logic must read typed fields only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

/// Who authored a `message` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human (or calling agent) side of the conversation.
    User,
    /// The agent side of the conversation.
    Assistant,
}

/// Variant-specific payload of a normalized event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    /// Out-of-band signal from the runtime (`started`, `cancelled`, ...).
    System {
        /// Signal subtype.
        subtype: String,
        /// Optional human-readable detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Consolidated message text.
    Message {
        /// Message author.
        role: Role,
        /// Full message text.
        text: String,
    },
    /// Streaming token chunk of an in-progress assistant message.
    Delta {
        /// Text fragment.
        text: String,
    },
    /// The agent invoked a tool.
    ToolCall {
        /// Opaque invocation ID correlating call and result.
        invocation_id: String,
        /// Tool name.
        tool: String,
        /// Tool arguments as given by the agent.
        args: Value,
    },
    /// A tool invocation finished.
    ToolResult {
        /// Opaque invocation ID correlating call and result.
        invocation_id: String,
        /// Tool name.
        tool: String,
        /// Result value (or error payload when `is_error`).
        result: Value,
        /// Whether the tool reported failure.
        is_error: bool,
    },
    /// The turn ended. The session stays alive for the next message.
    Completion {
        /// Backend-reported stop reason, when one exists.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    /// A stream-level error. Part of the normal event stream, not a
    /// transport failure; the session detaches but remains resumable.
    Error {
        /// Human-readable error text.
        message: String,
    },
}

impl StreamEventKind {
    /// Short variant label for logging and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Message { .. } => "message",
            Self::Delta { .. } => "delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Completion { .. } => "completion",
            Self::Error { .. } => "error",
        }
    }
}

/// One normalized event on a session's bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// Monotonic sequence number within the session, starting at 0.
    pub seq: u64,
    /// Wall-clock time the event was normalized.
    pub timestamp: DateTime<Utc>,
    /// Variant payload.
    #[serde(flatten)]
    pub kind: StreamEventKind,
    /// Originating backend's raw payload. Opaque; for observability only.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl StreamEvent {
    /// Build an event with the current timestamp. `seq` is assigned by the
    /// session bus, so this starts at 0 until sequenced.
    #[must_use]
    pub fn now(session_id: SessionId, kind: StreamEventKind, raw: Value) -> Self {
        Self {
            session_id,
            seq: 0,
            timestamp: Utc::now(),
            kind,
            raw,
        }
    }

    /// Whether this event marks the end of a turn.
    #[must_use]
    pub fn is_completion(&self) -> bool {
        matches!(self.kind, StreamEventKind::Completion { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
