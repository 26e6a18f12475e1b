//! `session_*` tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::config::Reasoning;
use oubliette_core::{ProjectId, SessionId, ToolAccess, ToolTarget, WorkspaceId};
use oubliette_sessions::SpawnOptions;
use oubliette_store::repositories::SessionFilter;

use crate::context::AppContext;
use crate::errors::McpError;
use crate::handlers::parse_args;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the session tool family.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "session_spawn",
        description: "Spawn an agent session in a project workspace",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Args,
        schema: object_schema(
            json!({
                "project_id": {"type": "string"},
                "workspace_id": {"type": "string"},
                "prompt": {"type": "string"},
                "parent_session_id": {"type": "string"},
                "caller_tools": {"type": "array", "items": {"type": "string"}},
            }),
            &["project_id"],
        ),
        handler: std::sync::Arc::new(Spawn),
    });
    registry.register(ToolDef {
        name: "session_message",
        description: "Send a message into an active session",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Session,
        schema: object_schema(
            json!({
                "session_id": {"type": "string"},
                "text": {"type": "string"},
                "reasoning": {"type": "string"},
            }),
            &["session_id", "text"],
        ),
        handler: std::sync::Arc::new(Message),
    });
    registry.register(ToolDef {
        name: "session_cancel",
        description: "Interrupt a session's current turn",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Session,
        schema: object_schema(json!({"session_id": {"type": "string"}}), &["session_id"]),
        handler: std::sync::Arc::new(Cancel),
    });
    registry.register(ToolDef {
        name: "session_end",
        description: "Detach a session; it stays resumable",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Session,
        schema: object_schema(json!({"session_id": {"type": "string"}}), &["session_id"]),
        handler: std::sync::Arc::new(End),
    });
    registry.register(ToolDef {
        name: "session_resume",
        description: "Re-attach a detached session",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Session,
        schema: object_schema(json!({"session_id": {"type": "string"}}), &["session_id"]),
        handler: std::sync::Arc::new(Resume),
    });
    registry.register(ToolDef {
        name: "session_list",
        description: "List a project's sessions",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Args,
        schema: object_schema(
            json!({
                "project_id": {"type": "string"},
                "active_only": {"type": "boolean"},
                "limit": {"type": "integer"},
            }),
            &["project_id"],
        ),
        handler: std::sync::Arc::new(ListSessions),
    });
    registry.register(ToolDef {
        name: "session_get",
        description: "Fetch one session's record",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Session,
        schema: object_schema(json!({"session_id": {"type": "string"}}), &["session_id"]),
        handler: std::sync::Arc::new(Get),
    });
    registry.register(ToolDef {
        name: "session_events",
        description: "Pull a session's events from an offset",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Session,
        schema: object_schema(
            json!({
                "session_id": {"type": "string"},
                "from_seq": {"type": "integer"},
                "max": {"type": "integer"},
                "wait": {"type": "boolean"},
            }),
            &["session_id"],
        ),
        handler: std::sync::Arc::new(Events),
    });
}

fn session_json(record: &oubliette_store::types::SessionRecord, active: bool) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Some(object) = value.as_object_mut() {
        // The creator token ID is the bearer secret; it never leaves the
        // server.
        let _ = object.remove("creator_token_id");
        let _ = object.insert("active".to_owned(), json!(active));
    }
    value
}

#[derive(Deserialize)]
struct SpawnArgs {
    project_id: ProjectId,
    #[serde(default)]
    workspace_id: Option<WorkspaceId>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    parent_session_id: Option<SessionId>,
    #[serde(default)]
    caller_tools: Vec<String>,
}

struct Spawn;

#[async_trait]
impl ToolHandler for Spawn {
    async fn handle(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: SpawnArgs = parse_args(args)?;
        let project = ctx.projects.get(&args.project_id)?;
        let workspace = ctx
            .projects
            .resolve_workspace(&args.project_id, args.workspace_id.as_ref())?;

        // Socket before container: the relay directory must exist when the
        // container mounts it.
        let socket_dir = ctx.projects.paths().socket_dir(&project.id);
        let _ = ctx
            .relay
            .start_project(&project.id, &socket_dir)
            .map_err(|e| McpError::from_fault(&e))?;

        let (record, _subscription) = ctx
            .sessions
            .spawn(SpawnOptions {
                project,
                workspace,
                parent_session_id: args.parent_session_id.clone(),
                prompt: args.prompt,
                creator_token_id: identity.token_id.clone(),
                creator_scope: identity.scope.to_string(),
            })
            .await?;

        // A nested spawn may expose the caller's tools to the child.
        if let Some(parent) = &args.parent_session_id {
            if !args.caller_tools.is_empty() {
                ctx.relay
                    .register_caller_tools(&record.id, parent, args.caller_tools);
            }
        }

        Ok(session_json(&record, true))
    }
}

#[derive(Deserialize)]
struct MessageArgs {
    session_id: SessionId,
    text: String,
    #[serde(default)]
    reasoning: Option<Reasoning>,
}

struct Message;

#[async_trait]
impl ToolHandler for Message {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: MessageArgs = parse_args(args)?;
        ctx.sessions
            .message(&args.session_id, &args.text, args.reasoning)
            .await?;
        Ok(json!({ "ok": true }))
    }
}

#[derive(Deserialize)]
struct SessionArg {
    session_id: SessionId,
}

struct Cancel;

#[async_trait]
impl ToolHandler for Cancel {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: SessionArg = parse_args(args)?;
        ctx.sessions.cancel(&args.session_id).await?;
        Ok(json!({ "ok": true }))
    }
}

struct End;

#[async_trait]
impl ToolHandler for End {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: SessionArg = parse_args(args)?;
        ctx.sessions.end(&args.session_id).await?;
        ctx.relay.forget_session(&args.session_id);
        Ok(json!({ "ok": true }))
    }
}

struct Resume;

#[async_trait]
impl ToolHandler for Resume {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: SessionArg = parse_args(args)?;
        let record = ctx.sessions.get(&args.session_id)?;
        let project = ctx.projects.get(&record.project_id)?;
        let (record, _subscription) = ctx.sessions.resume(&args.session_id, &project).await?;
        Ok(session_json(&record, true))
    }
}

#[derive(Deserialize)]
struct ListArgs {
    project_id: ProjectId,
    #[serde(default)]
    active_only: bool,
    #[serde(default)]
    limit: Option<u32>,
}

struct ListSessions;

#[async_trait]
impl ToolHandler for ListSessions {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ListArgs = parse_args(args)?;
        let records = ctx.sessions.list(&SessionFilter {
            project_id: Some(args.project_id),
            live_only: args.active_only,
            limit: args.limit,
        })?;
        let sessions: Vec<Value> = records
            .iter()
            .map(|r| session_json(r, ctx.sessions.is_active(&r.id)))
            .collect();
        Ok(json!({ "sessions": sessions }))
    }
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
        let args: SessionArg = parse_args(args)?;
        let record = ctx.sessions.get(&args.session_id)?;
        Ok(session_json(&record, ctx.sessions.is_active(&record.id)))
    }
}

#[derive(Deserialize)]
struct EventsArgs {
    session_id: SessionId,
    #[serde(default)]
    from_seq: u64,
    #[serde(default = "default_max")]
    max: usize,
    #[serde(default)]
    wait: bool,
}

fn default_max() -> usize {
    100
}

struct Events;

#[async_trait]
impl ToolHandler for Events {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: EventsArgs = parse_args(args)?;
        let (events, next_seq) = ctx
            .sessions
            .events(&args.session_id, args.from_seq, args.max, args.wait)
            .await?;
        Ok(json!({
            "events": serde_json::to_value(events).unwrap_or(Value::Null),
            "next_seq": next_seq,
        }))
    }
}
