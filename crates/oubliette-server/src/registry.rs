//! The tool registry and the single authorization gate.
//!
//! Every tool carries a target, an access level, and a rule for finding
//! the project it operates on. `tools/list` filtering, `tools/call`
//! gating, the relay gate, and the scheduler's fire-time gate all come
//! down to [`oubliette_core::Scope::allows`]; this module just resolves
//! the inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::{ProjectId, Scope, SessionId, ToolAccess, ToolTarget};

use crate::context::AppContext;
use crate::errors::McpError;

/// How the authorization gate finds the project a call operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectSource {
    /// Global tool; no project.
    None,
    /// `project_id` argument.
    Args,
    /// `session_id` argument; the session record names the project.
    Session,
    /// `targets` argument of a schedule being created; every named project
    /// must pass.
    ScheduleTargets,
    /// `schedule_id` argument; every target of the stored schedule must
    /// pass.
    Schedule,
}

/// Handler for one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute with validated, authorized arguments.
    async fn handle(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError>;
}

/// A registry entry.
pub struct ToolDef {
    /// Tool name.
    pub name: &'static str,
    /// One-line description advertised by `tools/list`.
    pub description: &'static str,
    /// Global or project-scoped.
    pub target: ToolTarget,
    /// Required access level.
    pub access: ToolAccess,
    /// Where the project ID comes from.
    pub project_source: ProjectSource,
    /// JSON schema of the input object.
    pub schema: Value,
    /// The handler.
    pub handler: Arc<dyn ToolHandler>,
}

/// The registry: name → definition, sorted for stable listings.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolDef>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool definition.
    pub fn register(&mut self, def: ToolDef) {
        let _ = self.tools.insert(def.name, def);
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.get(name)
    }

    /// The advertised catalogue for a scope: exactly the tools the scope
    /// could call with suitable arguments.
    #[must_use]
    pub fn list_for(&self, scope: &Scope) -> Vec<Value> {
        self.tools
            .values()
            .filter(|def| visible_to(def, scope))
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "inputSchema": def.schema,
                })
            })
            .collect()
    }

    /// Gate and dispatch one call. The same path serves the MCP surface
    /// and the relay.
    pub async fn call(
        &self,
        ctx: &AppContext,
        identity: &AuthIdentity,
        name: &str,
        args: Value,
    ) -> Result<Value, McpError> {
        let def = self
            .get(name)
            .ok_or_else(|| McpError::invalid(format!("unknown tool '{name}'")))?;

        authorize(ctx, def, &identity.scope, &args)?;
        validate_schema(&def.schema, &args)?;
        def.handler.handle(ctx, identity, args).await
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The ACL gate: resolve the project(s) per the definition's source, then
/// ask the scope.
pub fn authorize(
    ctx: &AppContext,
    def: &ToolDef,
    scope: &Scope,
    args: &Value,
) -> Result<(), McpError> {
    let projects = resolve_projects(ctx, def, args)?;
    match def.target {
        ToolTarget::Global => {
            if !scope.allows(ToolTarget::Global, def.access, None) {
                return Err(McpError::denied(format!(
                    "scope '{scope}' does not permit {}",
                    def.name
                )));
            }
        }
        ToolTarget::Project => {
            if projects.is_empty() {
                return Err(McpError::denied(format!(
                    "{} requires a project",
                    def.name
                )));
            }
            for project in &projects {
                if !scope.allows(ToolTarget::Project, def.access, Some(project)) {
                    return Err(McpError::denied(format!(
                        "scope '{scope}' does not permit {} on {project}",
                        def.name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn resolve_projects(
    ctx: &AppContext,
    def: &ToolDef,
    args: &Value,
) -> Result<Vec<ProjectId>, McpError> {
    match def.project_source {
        ProjectSource::None => Ok(Vec::new()),
        ProjectSource::Args => {
            let project = args
                .get("project_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            Ok(project.map(|p| vec![ProjectId::from(p)]).unwrap_or_default())
        }
        ProjectSource::Session => {
            let session = args
                .get("session_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| McpError::invalid("missing 'session_id'"))?;
            let record = ctx
                .sessions
                .get(&SessionId::from(session))
                .map_err(|e| McpError::from_fault(&e))?;
            Ok(vec![record.project_id])
        }
        ProjectSource::ScheduleTargets => {
            let targets = args
                .get("targets")
                .and_then(Value::as_array)
                .ok_or_else(|| McpError::invalid("missing 'targets'"))?;
            let mut projects = Vec::with_capacity(targets.len());
            for target in targets {
                let project = target
                    .get("project_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| McpError::invalid("target missing 'project_id'"))?;
                projects.push(ProjectId::from(project));
            }
            Ok(projects)
        }
        ProjectSource::Schedule => {
            let schedule = args
                .get("schedule_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| McpError::invalid("missing 'schedule_id'"))?;
            let record = ctx
                .scheduler
                .get(&oubliette_core::ScheduleId::from(schedule))
                .map_err(|e| McpError::from_fault(&e))?;
            Ok(record
                .targets
                .into_iter()
                .map(|t| t.project_id)
                .collect())
        }
    }
}

/// Whether any argument could make this tool callable under the scope.
/// Drives `tools/list` filtering.
fn visible_to(def: &ToolDef, scope: &Scope) -> bool {
    match def.target {
        ToolTarget::Global => scope.allows(ToolTarget::Global, def.access, None),
        ToolTarget::Project => match scope {
            Scope::Admin => true,
            Scope::AdminReadOnly => def.access == ToolAccess::Read,
            Scope::Project(own) => {
                scope.allows(ToolTarget::Project, def.access, Some(own))
            }
            Scope::ProjectReadOnly(own) => {
                scope.allows(ToolTarget::Project, def.access, Some(own))
            }
        },
    }
}

/// Minimal input validation: the argument object must carry every
/// `required` property of the schema.
pub fn validate_schema(schema: &Value, args: &Value) -> Result<(), McpError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    if required.is_empty() {
        return Ok(());
    }
    let object = args
        .as_object()
        .ok_or_else(|| McpError::invalid("arguments must be an object"))?;
    for field in required {
        let Some(field) = field.as_str() else { continue };
        if !object.contains_key(field) || object[field].is_null() {
            return Err(McpError::invalid(format!("missing required field '{field}'")));
        }
    }
    Ok(())
}

/// Schema helper: an object schema with the given properties; `required`
/// lists the mandatory ones.
#[must_use]
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
