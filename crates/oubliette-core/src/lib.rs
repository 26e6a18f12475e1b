//! # oubliette-core
//!
//! Shared domain model for the Oubliette control plane.
//!
//! Everything that crosses a crate boundary lives here: branded IDs, the
//! normalized [`events::StreamEvent`] type, the scope/ACL model, canonical
//! agent configuration, and the error taxonomy. This crate has no I/O.

#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod scope;

pub use errors::{ErrorKind, Fault};
pub use events::{StreamEvent, StreamEventKind};
pub use ids::{ExecutionId, ProjectId, ScheduleId, SessionId, TokenId, WorkspaceId};
pub use scope::{Scope, ToolAccess, ToolTarget};
