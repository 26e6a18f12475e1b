//! Session layer errors.

use oubliette_agent::AgentError;
use oubliette_core::{ErrorKind, Fault};
use oubliette_projects::ProjectError;
use oubliette_store::StoreError;
use thiserror::Error;

/// Errors from the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown (or deleted) session.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The operation needs a live executor; resume first.
    #[error("session not active: {0}")]
    NotActive(String),

    /// The session is mid-detach; retry after it settles.
    #[error("session already detaching: {0}")]
    AlreadyDetaching(String),

    /// Depth or fan-out cap would be violated.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// The project's container cannot be brought up.
    #[error("container unavailable: {0}")]
    ContainerUnavailable(String),

    /// The runtime session could not be relaunched.
    #[error("resume failed: {0}")]
    ResumeFailed(String),

    /// The executor's inbox is full; the caller must back off.
    #[error("backpressure: session {0} is not accepting messages")]
    Backpressure(String),

    /// Parent session belongs to a different project or is gone.
    #[error("invalid parent session: {0}")]
    InvalidParent(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Project registry failure.
    #[error(transparent)]
    Project(#[from] ProjectError),

    /// Agent runtime failure.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl Fault for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotActive(_) | Self::AlreadyDetaching(_) => ErrorKind::Conflict,
            Self::LimitExceeded(_) | Self::Backpressure(_) => ErrorKind::LimitExceeded,
            Self::ContainerUnavailable(_) | Self::ResumeFailed(_) => ErrorKind::Unavailable,
            Self::InvalidParent(_) => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
            Self::Project(e) => e.kind(),
            Self::Agent(e) => e.kind(),
        }
    }
}
