//! Relay errors.

use oubliette_core::{ErrorKind, Fault};
use thiserror::Error;

/// Errors on the relay path.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Request missing identity params or malformed JSON-RPC.
    #[error("invalid relay request: {0}")]
    InvalidRequest(String),

    /// Unknown relay method.
    #[error("unknown relay method: {0}")]
    UnknownMethod(String),

    /// A spawning call would exceed the project's recursion depth.
    #[error("recursion depth limit: {0}")]
    DepthExceeded(String),

    /// The session's creator scope does not permit the call.
    #[error("relay call denied: {0}")]
    Denied(String),

    /// No caller-tool manifest exists for the session.
    #[error("no caller tools registered for session {0}")]
    NoCaller(String),

    /// The caller's connection is gone; the forwarded call cannot land.
    #[error("caller connection unavailable for session {0}")]
    CallerUnavailable(String),

    /// The session in the identity params is unknown.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Socket I/O failure.
    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised by the host-side tool handler. Carries the kind the
    /// handler classified itself with.
    #[error("{message}")]
    Dispatch {
        /// Classification from the tool handler.
        kind: ErrorKind,
        /// Human-readable message.
        message: String,
    },
}

impl RelayError {
    /// Wrap a host-side handler failure.
    #[must_use]
    pub fn dispatch(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Dispatch {
            kind,
            message: message.into(),
        }
    }
}

impl Fault for RelayError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::UnknownMethod(_) => ErrorKind::Validation,
            Self::DepthExceeded(_) => ErrorKind::LimitExceeded,
            Self::Denied(_) => ErrorKind::Authorization,
            Self::NoCaller(_) | Self::UnknownSession(_) => ErrorKind::NotFound,
            Self::CallerUnavailable(_) => ErrorKind::Unavailable,
            Self::Io(_) => ErrorKind::Internal,
            Self::Dispatch { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            RelayError::DepthExceeded("d".into()).kind(),
            ErrorKind::LimitExceeded
        );
        assert_eq!(RelayError::Denied("x".into()).kind(), ErrorKind::Authorization);
        assert_eq!(
            RelayError::dispatch(ErrorKind::NotFound, "missing").kind(),
            ErrorKind::NotFound
        );
    }
}
