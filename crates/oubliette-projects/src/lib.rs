//! # oubliette-projects
//!
//! The project/workspace registry and the container glue around it.
//!
//! A project is the tenant boundary: one container, one canonical agent
//! config, one or more workspaces. Canonical config lives as one JSON file
//! per project directory; the registry keeps a write-through cache in
//! front of the files.

#![deny(unsafe_code)]

pub mod errors;
pub mod layout;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use errors::ProjectError;
pub use layout::ProjectPaths;
pub use registry::{ProjectDefaults, ProjectRegistry};
pub use supervisor::{ProjectSupervisor, Provisioner};
pub use types::{ProjectCreateParams, ProjectRecord, WorkspaceRecord};
