//! Container layer errors.

use oubliette_core::{ErrorKind, Fault};
use thiserror::Error;

/// Errors surfaced by a container runtime implementation.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Named container does not exist.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Named image does not exist locally and could not be pulled.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The runtime daemon is unreachable.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// A runtime operation failed.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// I/O failure talking to the runtime or an exec stream.
    #[error("container io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Fault for ContainerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::ImageNotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Runtime(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}
