//! Auth error types.

use oubliette_core::{ErrorKind, Fault};
use oubliette_store::StoreError;
use thiserror::Error;

/// Errors from token validation and management.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header was presented.
    #[error("missing bearer token")]
    MissingBearer,

    /// The bearer string does not look like a token.
    #[error("malformed bearer token")]
    MalformedBearer,

    /// The bearer is well-formed but not in the store.
    #[error("unknown token")]
    UnknownToken,

    /// The token's `expires_at` has passed.
    #[error("token expired")]
    TokenExpired,

    /// A scope string failed to parse.
    #[error("invalid scope '{0}'")]
    InvalidScope(String),

    /// The token's scope does not permit the requested operation.
    #[error("scope '{scope}' does not permit {operation}")]
    ScopeDenied {
        /// The holder's scope.
        scope: String,
        /// What was attempted.
        operation: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Build a [`AuthError::ScopeDenied`].
    #[must_use]
    pub fn denied(scope: impl std::fmt::Display, operation: impl Into<String>) -> Self {
        Self::ScopeDenied {
            scope: scope.to_string(),
            operation: operation.into(),
        }
    }
}

impl Fault for AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBearer | Self::MalformedBearer | Self::UnknownToken | Self::TokenExpired => {
                ErrorKind::Authentication
            }
            Self::ScopeDenied { .. } => ErrorKind::Authorization,
            Self::InvalidScope(_) => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_failures_are_authentication() {
        for err in [
            AuthError::MissingBearer,
            AuthError::MalformedBearer,
            AuthError::UnknownToken,
            AuthError::TokenExpired,
        ] {
            assert_eq!(err.kind(), ErrorKind::Authentication);
        }
    }

    #[test]
    fn scope_denied_is_authorization() {
        let err = AuthError::denied("project:proj_a:ro", "session_spawn");
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(err.to_string().contains("session_spawn"));
    }

    #[test]
    fn store_errors_pass_through() {
        let err = AuthError::Store(StoreError::not_found("token", "oub_x"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
