//! Wire-facing error type for tool handlers.
//!
//! Handlers return [`McpError`]; the dispatcher turns it into a JSON-RPC
//! error body. Component errors convert via their [`Fault`] classification,
//! so internal detail stays in the logs and off the wire.

use oubliette_core::{ErrorKind, Fault};

/// A handler failure, already classified for the wire.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct McpError {
    /// Behavioral classification; decides the JSON-RPC code.
    pub kind: ErrorKind,
    /// Short, safe, human-readable message.
    pub message: String,
}

impl McpError {
    /// Build an error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A validation failure naming the offending field.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// An authorization denial.
    #[must_use]
    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// The JSON-RPC code for this error.
    #[must_use]
    pub fn code(&self) -> i64 {
        self.kind.jsonrpc_code()
    }

    /// Convert any classified component error, keeping its message.
    pub fn from_fault<E: Fault + std::fmt::Display>(error: &E) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl<E: Fault + std::fmt::Display + std::error::Error> From<E> for McpError {
    fn from(error: E) -> Self {
        Self::from_fault(&error)
    }
}
