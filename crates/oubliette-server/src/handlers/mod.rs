//! Tool handlers, one module per tool family.

pub mod catalog;
pub mod project;
pub mod schedule;
pub mod session;
pub mod token;
pub mod workspace;

use crate::registry::ToolRegistry;

/// Build the full tool registry.
#[must_use]
pub fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    project::register(&mut registry);
    workspace::register(&mut registry);
    session::register(&mut registry);
    schedule::register(&mut registry);
    token::register(&mut registry);
    catalog::register(&mut registry);
    registry
}

/// Parse handler arguments into a typed struct.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    args: serde_json::Value,
) -> Result<T, crate::errors::McpError> {
    serde_json::from_value(args)
        .map_err(|e| crate::errors::McpError::invalid(format!("bad arguments: {e}")))
}
