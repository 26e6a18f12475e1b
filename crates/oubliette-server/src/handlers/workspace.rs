//! `workspace_*` tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::{ProjectId, ToolAccess, ToolTarget};

use crate::context::AppContext;
use crate::errors::McpError;
use crate::handlers::parse_args;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the workspace tool family.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "workspace_create",
        description: "Create a named workspace in a project",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Args,
        schema: object_schema(
            json!({
                "project_id": {"type": "string"},
                "name": {"type": "string"},
            }),
            &["project_id", "name"],
        ),
        handler: std::sync::Arc::new(Create),
    });
    registry.register(ToolDef {
        name: "workspace_list",
        description: "List a project's workspaces",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Args,
        schema: object_schema(json!({"project_id": {"type": "string"}}), &["project_id"]),
        handler: std::sync::Arc::new(List),
    });
}

#[derive(Deserialize)]
struct CreateArgs {
    project_id: ProjectId,
    name: String,
}

struct Create;

#[async_trait]
impl ToolHandler for Create {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: CreateArgs = parse_args(args)?;
        let workspace = ctx.projects.create_workspace(&args.project_id, &args.name)?;
        Ok(serde_json::to_value(workspace).unwrap_or(Value::Null))
    }
}

#[derive(Deserialize)]
struct ListArgs {
    project_id: ProjectId,
}

struct List;

#[async_trait]
impl ToolHandler for List {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ListArgs = parse_args(args)?;
        let workspaces = ctx.projects.list_workspaces(&args.project_id)?;
        Ok(json!({
            "workspaces": serde_json::to_value(workspaces).unwrap_or(Value::Null),
        }))
    }
}
