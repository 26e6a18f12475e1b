//! Scheduler errors.

use oubliette_core::{ErrorKind, Fault};
use oubliette_store::StoreError;
use thiserror::Error;

/// Errors from schedule management and the tick loop.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Unknown schedule ID.
    #[error("schedule not found: {0}")]
    NotFound(String),

    /// The cron expression does not parse.
    #[error("invalid cron '{expr}': {detail}")]
    InvalidCron {
        /// The offending expression.
        expr: String,
        /// Parser detail.
        detail: String,
    },

    /// Bad input (no targets, empty prompt, unknown policy).
    #[error("invalid schedule input: {0}")]
    Validation(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Fault for ScheduleError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidCron { .. } | Self::Validation(_) => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
        }
    }
}
