//! The error taxonomy shared across crates.
//!
//! Each crate keeps its own `thiserror` enum, but every
//! error that can reach the MCP boundary classifies itself into one
//! [`ErrorKind`] via the [`Fault`] trait. The server maps kinds to JSON-RPC
//! codes in exactly one place; internal detail never leaks onto the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure, by behavior rather than by type name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, malformed, unknown, or expired bearer.
    Authentication,
    /// Known token lacking scope for the requested tool/project.
    Authorization,
    /// Bad input shape, unknown enum value, invalid cron, missing field.
    Validation,
    /// Unknown project/workspace/session/schedule/token.
    NotFound,
    /// Duplicate name, resume on an active session.
    Conflict,
    /// Depth or fan-out cap, rate limit, cost cap.
    LimitExceeded,
    /// Container runtime down, agent runtime down, credential missing.
    Unavailable,
    /// Persistence or invariant failure.
    Internal,
}

impl ErrorKind {
    /// The JSON-RPC error code this kind maps to, used identically at the
    /// MCP surface and on the relay wire. Rate limiting is the one special
    /// case (`-32029`), applied by the server directly.
    #[must_use]
    pub fn jsonrpc_code(self) -> i64 {
        match self {
            Self::Authentication => -32001,
            Self::Authorization => -32002,
            Self::Unavailable => -32003,
            Self::NotFound => -32004,
            Self::LimitExceeded => -32005,
            Self::Conflict => -32009,
            Self::Validation => -32602,
            Self::Internal => -32603,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::LimitExceeded => "limit_exceeded",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Implemented by every crate-level error enum that can cross the MCP
/// boundary.
pub trait Fault {
    /// The behavioral classification of this error.
    fn kind(&self) -> ErrorKind;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ErrorKind::LimitExceeded.to_string(), "limit_exceeded");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }

    #[test]
    fn serde_matches_display() {
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::LimitExceeded,
            ErrorKind::Unavailable,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
