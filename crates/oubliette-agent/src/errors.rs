//! Agent adapter errors.

use oubliette_core::{ErrorKind, Fault};
use thiserror::Error;

/// Errors from the agent runtime layer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The backend server cannot be reached or failed its health poll.
    #[error("agent backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected a request.
    #[error("agent backend error: {0}")]
    Backend(String),

    /// Resume was requested but the backend no longer knows the session.
    #[error("runtime session discarded by backend: {0}")]
    SessionDiscarded(String),

    /// The executor has been closed; no further operations are possible.
    #[error("executor closed")]
    Closed,

    /// HTTP transport failure.
    #[error("agent transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl Fault for AgentError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::SessionDiscarded(_) => ErrorKind::NotFound,
            Self::Closed => ErrorKind::Conflict,
            Self::Backend(_) | Self::Transport(_) => ErrorKind::Internal,
        }
    }
}
