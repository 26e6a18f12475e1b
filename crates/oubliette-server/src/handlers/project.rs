//! `project_*` tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::config::{AgentConfig, ProjectLimits};
use oubliette_core::{ProjectId, ToolAccess, ToolTarget};
use oubliette_projects::ProjectCreateParams;

use crate::context::AppContext;
use crate::errors::McpError;
use crate::handlers::parse_args;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the project tool family.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "project_create",
        description: "Create a project with its container and default workspace",
        target: ToolTarget::Global,
        access: ToolAccess::Write,
        project_source: ProjectSource::None,
        schema: object_schema(
            json!({
                "name": {"type": "string"},
                "container_type": {"type": "string"},
                "agent": {"type": "object"},
                "limits": {"type": "object"},
                "credential_providers": {"type": "array", "items": {"type": "string"}},
            }),
            &["name"],
        ),
        handler: std::sync::Arc::new(Create),
    });
    registry.register(ToolDef {
        name: "project_list",
        description: "List projects visible to the caller",
        target: ToolTarget::Global,
        access: ToolAccess::Read,
        project_source: ProjectSource::None,
        schema: object_schema(json!({}), &[]),
        handler: std::sync::Arc::new(List),
    });
    registry.register(ToolDef {
        name: "project_get",
        description: "Fetch one project's record",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Args,
        schema: object_schema(json!({"project_id": {"type": "string"}}), &["project_id"]),
        handler: std::sync::Arc::new(Get),
    });
    registry.register(ToolDef {
        name: "project_delete",
        description: "Delete a project and everything it owns",
        target: ToolTarget::Project,
        access: ToolAccess::Admin,
        project_source: ProjectSource::Args,
        schema: object_schema(json!({"project_id": {"type": "string"}}), &["project_id"]),
        handler: std::sync::Arc::new(Delete),
    });
    registry.register(ToolDef {
        name: "project_refresh_images",
        description: "Pull the project's container image",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Args,
        schema: object_schema(json!({"project_id": {"type": "string"}}), &["project_id"]),
        handler: std::sync::Arc::new(RefreshImages),
    });
}

fn project_json(record: &oubliette_projects::ProjectRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

#[derive(Deserialize)]
struct CreateArgs {
    name: String,
    #[serde(default)]
    container_type: Option<String>,
    #[serde(default)]
    agent: Option<AgentConfig>,
    #[serde(default)]
    limits: Option<ProjectLimits>,
    #[serde(default)]
    credential_providers: Vec<String>,
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
        let record = ctx.projects.create(&ProjectCreateParams {
            name: args.name,
            container_type: args.container_type,
            agent: args.agent,
            limits: args.limits,
            credential_providers: args.credential_providers,
        })?;
        // The relay socket comes up with the project so the directory is
        // ready when the container first mounts it.
        let socket_dir = ctx.projects.paths().socket_dir(&record.id);
        let _ = ctx
            .relay
            .start_project(&record.id, &socket_dir)
            .map_err(|e| McpError::from_fault(&e))?;
        Ok(project_json(&record))
    }
}

struct List;

#[async_trait]
impl ToolHandler for List {
    async fn handle(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        _args: Value,
    ) -> Result<Value, McpError> {
        let projects: Vec<Value> = ctx
            .projects
            .list()
            .iter()
            .filter(|p| identity.scope.can_see_project(&p.id))
            .map(project_json)
            .collect();
        Ok(json!({ "projects": projects }))
    }
}

#[derive(Deserialize)]
struct ProjectArg {
    project_id: ProjectId,
}

struct Get;

#[async_trait]
impl ToolHandler for Get {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ProjectArg = parse_args(args)?;
        Ok(project_json(&ctx.projects.get(&args.project_id)?))
    }
}

struct Delete;

#[async_trait]
impl ToolHandler for Delete {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ProjectArg = parse_args(args)?;
        let record = ctx.projects.get(&args.project_id)?;

        // Cascade: sessions, schedules, relay socket, container, then the
        // registry entry and directory tree.
        let ended = ctx.sessions.purge_project(&args.project_id).await?;
        ctx.scheduler.purge_project(&args.project_id)?;
        ctx.relay
            .stop_project(&args.project_id)
            .map_err(|e| McpError::from_fault(&e))?;
        ctx.provisioner.remove(&record).await?;
        let _ = ctx.projects.delete(&args.project_id)?;

        Ok(json!({ "deleted": true, "sessions_ended": ended }))
    }
}

struct RefreshImages;

#[async_trait]
impl ToolHandler for RefreshImages {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ProjectArg = parse_args(args)?;
        let record = ctx.projects.get(&args.project_id)?;
        ctx.container
            .pull(&record.image)
            .await
            .map_err(|e| McpError::from_fault(&e))?;
        Ok(json!({ "image": record.image, "pulled": true }))
    }
}
