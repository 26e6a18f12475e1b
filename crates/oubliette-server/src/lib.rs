//! # oubliette-server
//!
//! The MCP surface: a thin JSON-RPC 2.0 dispatcher over HTTP.
//!
//! Responsibilities stop at parse → authenticate → rate-limit → look up
//! tool → ACL check → schema check → call the component handler → wrap the
//! result. Everything substantive lives in the component crates; handlers
//! here are glue.

#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod launcher;
pub mod registry;
pub mod server;
pub mod settings;
pub mod shutdown;
#[cfg(test)]
pub mod test_support;

pub use context::AppContext;
pub use errors::McpError;
pub use registry::{ProjectSource, ToolDef, ToolHandler, ToolRegistry};
pub use server::OublietteServer;
pub use settings::Settings;
pub use shutdown::ShutdownCoordinator;
