//! Project registry errors.

use oubliette_core::{ErrorKind, Fault};
use thiserror::Error;

/// Errors from the project/workspace registry.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Unknown project ID.
    #[error("project not found: {0}")]
    NotFound(String),

    /// Unknown workspace ID within a known project.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// A project with the same name already exists.
    #[error("project name already in use: {0}")]
    DuplicateName(String),

    /// Bad creation input (empty name, unknown container type).
    #[error("invalid project input: {0}")]
    Validation(String),

    /// Config file I/O failure.
    #[error("project storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file decode failure.
    #[error("corrupt project config: {0}")]
    Corrupt(String),

    /// Container runtime failure while provisioning.
    #[error(transparent)]
    Container(#[from] oubliette_container::ContainerError),
}

impl Fault for ProjectError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::WorkspaceNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateName(_) => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Io(_) | Self::Corrupt(_) => ErrorKind::Internal,
            Self::Container(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(ProjectError::NotFound("proj_x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(ProjectError::DuplicateName("p1".into()).kind(), ErrorKind::Conflict);
        assert_eq!(ProjectError::Validation("empty".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            ProjectError::Container(oubliette_container::ContainerError::Unavailable("x".into()))
                .kind(),
            ErrorKind::Unavailable
        );
    }
}
