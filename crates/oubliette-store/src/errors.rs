//! Store error type.

use oubliette_core::{ErrorKind, Fault};
use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Migration failure.
    #[error("migration failed: {message}")]
    Migration {
        /// What went wrong.
        message: String,
    },

    /// A row expected to exist was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Table / entity name.
        entity: &'static str,
        /// Missing ID.
        id: String,
    },

    /// A value read from storage could not be decoded.
    #[error("corrupt {entity} row {id}: {message}")]
    Corrupt {
        /// Table / entity name.
        entity: &'static str,
        /// Offending row ID.
        id: String,
        /// Decode failure detail.
        message: String,
    },
}

impl StoreError {
    /// Build a [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl Fault for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Sqlite(_) | Self::Pool(_) | Self::Migration { .. } | Self::Corrupt { .. } => {
                ErrorKind::Internal
            }
        }
    }
}
