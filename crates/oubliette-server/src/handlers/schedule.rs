//! `schedule_*` tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::{ProjectId, ScheduleId, ToolAccess, ToolTarget, WorkspaceId};
use oubliette_scheduler::ScheduleCreate;
use oubliette_store::types::{OverlapPolicy, ScheduleUpdate, SessionPolicy};

use crate::context::AppContext;
use crate::errors::McpError;
use crate::handlers::parse_args;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the schedule tool family.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "schedule_create",
        description: "Create a cron schedule that drives prompts into sessions",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::ScheduleTargets,
        schema: object_schema(
            json!({
                "name": {"type": "string"},
                "cron": {"type": "string"},
                "prompt": {"type": "string"},
                "enabled": {"type": "boolean"},
                "overlap_policy": {"type": "string", "enum": ["skip", "queue", "parallel"]},
                "session_policy": {"type": "string", "enum": ["resume", "new"]},
                "targets": {"type": "array", "items": {"type": "object"}},
            }),
            &["name", "cron", "prompt", "targets"],
        ),
        handler: std::sync::Arc::new(Create),
    });
    registry.register(ToolDef {
        name: "schedule_list",
        description: "List schedules visible to the caller",
        target: ToolTarget::Global,
        access: ToolAccess::Read,
        project_source: ProjectSource::None,
        schema: object_schema(json!({}), &[]),
        handler: std::sync::Arc::new(List),
    });
    registry.register(ToolDef {
        name: "schedule_update",
        description: "Update a schedule; a cron change recomputes the next run",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Schedule,
        schema: object_schema(
            json!({
                "schedule_id": {"type": "string"},
                "name": {"type": "string"},
                "cron": {"type": "string"},
                "prompt": {"type": "string"},
                "enabled": {"type": "boolean"},
                "overlap_policy": {"type": "string"},
                "session_policy": {"type": "string"},
                "targets": {"type": "array", "items": {"type": "object"}},
            }),
            &["schedule_id"],
        ),
        handler: std::sync::Arc::new(Update),
    });
    registry.register(ToolDef {
        name: "schedule_delete",
        description: "Delete a schedule and its execution history",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Schedule,
        schema: object_schema(json!({"schedule_id": {"type": "string"}}), &["schedule_id"]),
        handler: std::sync::Arc::new(Delete),
    });
    registry.register(ToolDef {
        name: "schedule_trigger",
        description: "Fire a schedule immediately, ignoring the cron clock",
        target: ToolTarget::Project,
        access: ToolAccess::Write,
        project_source: ProjectSource::Schedule,
        schema: object_schema(json!({"schedule_id": {"type": "string"}}), &["schedule_id"]),
        handler: std::sync::Arc::new(Trigger),
    });
    registry.register(ToolDef {
        name: "schedule_executions",
        description: "Recent execution history of a schedule",
        target: ToolTarget::Project,
        access: ToolAccess::Read,
        project_source: ProjectSource::Schedule,
        schema: object_schema(
            json!({
                "schedule_id": {"type": "string"},
                "limit": {"type": "integer"},
            }),
            &["schedule_id"],
        ),
        handler: std::sync::Arc::new(Executions),
    });
}

fn schedule_json(record: &oubliette_store::types::ScheduleRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Some(object) = value.as_object_mut() {
        // The creator token ID is the bearer secret; it never leaves the
        // server.
        let _ = object.remove("creator_token_id");
    }
    value
}

#[derive(Deserialize)]
struct TargetArg {
    project_id: ProjectId,
    #[serde(default)]
    workspace_id: Option<WorkspaceId>,
}

#[derive(Deserialize)]
struct CreateArgs {
    name: String,
    cron: String,
    prompt: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    overlap_policy: OverlapPolicy,
    #[serde(default)]
    session_policy: SessionPolicy,
    targets: Vec<TargetArg>,
}

fn default_enabled() -> bool {
    true
}

struct Create;

#[async_trait]
impl ToolHandler for Create {
    async fn handle(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: CreateArgs = parse_args(args)?;
        // Targets must name real projects before anything persists.
        for target in &args.targets {
            let _ = ctx.projects.get(&target.project_id)?;
        }
        let record = ctx.scheduler.create(ScheduleCreate {
            name: args.name,
            cron: args.cron,
            prompt: args.prompt,
            enabled: args.enabled,
            overlap_policy: args.overlap_policy,
            session_policy: args.session_policy,
            creator_token_id: identity.token_id.clone(),
            creator_scope: identity.scope.to_string(),
            targets: args
                .targets
                .into_iter()
                .map(|t| (t.project_id, t.workspace_id))
                .collect(),
        })?;
        Ok(schedule_json(&record))
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
        let schedules: Vec<Value> = ctx
            .scheduler
            .list()?
            .into_iter()
            .filter(|s| {
                s.targets
                    .iter()
                    .all(|t| identity.scope.can_see_project(&t.project_id))
            })
            .map(|s| schedule_json(&s))
            .collect();
        Ok(json!({ "schedules": schedules }))
    }
}

#[derive(Deserialize)]
struct UpdateArgs {
    schedule_id: ScheduleId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    overlap_policy: Option<OverlapPolicy>,
    #[serde(default)]
    session_policy: Option<SessionPolicy>,
    #[serde(default)]
    targets: Option<Vec<TargetArg>>,
}

struct Update;

#[async_trait]
impl ToolHandler for Update {
    async fn handle(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: UpdateArgs = parse_args(args)?;
        // Replacement targets are authorized and validated like new ones.
        if let Some(targets) = &args.targets {
            for target in targets {
                let _ = ctx.projects.get(&target.project_id)?;
                if !identity.scope.allows(
                    ToolTarget::Project,
                    ToolAccess::Write,
                    Some(&target.project_id),
                ) {
                    return Err(McpError::denied(format!(
                        "scope '{}' does not permit scheduling on {}",
                        identity.scope, target.project_id
                    )));
                }
            }
        }
        let record = ctx.scheduler.update(
            &args.schedule_id,
            ScheduleUpdate {
                name: args.name,
                cron: args.cron,
                prompt: args.prompt,
                enabled: args.enabled,
                overlap_policy: args.overlap_policy,
                session_policy: args.session_policy,
                next_run_at: None,
                targets: args
                    .targets
                    .map(|ts| ts.into_iter().map(|t| (t.project_id, t.workspace_id)).collect()),
            },
        )?;
        Ok(schedule_json(&record))
    }
}

#[derive(Deserialize)]
struct ScheduleArg {
    schedule_id: ScheduleId,
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
        let args: ScheduleArg = parse_args(args)?;
        let deleted = ctx.scheduler.delete(&args.schedule_id)?;
        Ok(json!({ "deleted": deleted }))
    }
}

struct Trigger;

#[async_trait]
impl ToolHandler for Trigger {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ScheduleArg = parse_args(args)?;
        let executions = ctx.scheduler.trigger_now(&args.schedule_id).await?;
        Ok(json!({
            "executions": serde_json::to_value(executions).unwrap_or(Value::Null),
        }))
    }
}

#[derive(Deserialize)]
struct ExecutionsArgs {
    schedule_id: ScheduleId,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

struct Executions;

#[async_trait]
impl ToolHandler for Executions {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: ExecutionsArgs = parse_args(args)?;
        let executions = ctx.scheduler.executions(&args.schedule_id, args.limit)?;
        Ok(json!({
            "executions": serde_json::to_value(executions).unwrap_or(Value::Null),
        }))
    }
}
