//! Read-only catalogue tools, visible to any valid token.

use async_trait::async_trait;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::{ToolAccess, ToolTarget};

use crate::context::AppContext;
use crate::errors::McpError;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the catalogue tools.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "container_types",
        description: "Logical container types available for projects",
        target: ToolTarget::Global,
        access: ToolAccess::Read,
        project_source: ProjectSource::None,
        schema: object_schema(json!({}), &[]),
        handler: std::sync::Arc::new(ContainerTypes),
    });
    registry.register(ToolDef {
        name: "model_options",
        description: "Model identifiers the server accepts",
        target: ToolTarget::Global,
        access: ToolAccess::Read,
        project_source: ProjectSource::None,
        schema: object_schema(json!({}), &[]),
        handler: std::sync::Arc::new(ModelOptions),
    });
}

struct ContainerTypes;

#[async_trait]
impl ToolHandler for ContainerTypes {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        _args: Value,
    ) -> Result<Value, McpError> {
        let mut types: Vec<&String> = ctx.settings.containers.keys().collect();
        types.sort();
        Ok(json!({
            "container_types": types,
            "default": ctx.settings.defaults.container.container_type,
        }))
    }
}

struct ModelOptions;

#[async_trait]
impl ToolHandler for ModelOptions {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        _args: Value,
    ) -> Result<Value, McpError> {
        Ok(json!({
            "models": ctx.settings.model_options,
            "default": ctx.settings.defaults.agent.model,
        }))
    }
}
