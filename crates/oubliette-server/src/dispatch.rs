//! The relay's view into the tool registry.
//!
//! Relay calls carry no bearer; identity is the session record's stored
//! creator token and scope, attached at spawn time. Every call re-runs the
//! same ACL gate the MCP surface uses.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use oubliette_auth::AuthIdentity;
use oubliette_core::{ProjectId, Scope};
use oubliette_relay::{RelayDispatcher, RelayError, RelayIdentity};

use crate::context::AppContext;
use crate::registry::ToolRegistry;

/// Breaks the construction cycle between the relay and the context: the
/// relay service is built against this empty shell, and the real
/// dispatcher is bound once the context exists. Calls before binding fail
/// `Unavailable`.
#[derive(Default)]
pub struct LateBoundDispatcher {
    inner: std::sync::OnceLock<RegistryDispatcher>,
}

impl LateBoundDispatcher {
    /// Create an unbound shell.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind the real dispatcher. Later binds are ignored.
    pub fn bind(&self, ctx: AppContext, registry: Arc<ToolRegistry>) {
        let _ = self.inner.set(RegistryDispatcher::new(ctx, registry));
    }

    fn get(&self) -> Result<&RegistryDispatcher, RelayError> {
        self.inner
            .get()
            .ok_or_else(|| RelayError::dispatch(
                oubliette_core::ErrorKind::Unavailable,
                "relay dispatcher not yet bound",
            ))
    }
}

#[async_trait]
impl RelayDispatcher for LateBoundDispatcher {
    async fn list_tools(&self, identity: &RelayIdentity) -> Result<Value, RelayError> {
        self.get()?.list_tools(identity).await
    }

    async fn call_tool(
        &self,
        identity: &RelayIdentity,
        tool: &str,
        args: Value,
    ) -> Result<Value, RelayError> {
        self.get()?.call_tool(identity, tool, args).await
    }

    fn max_recursion_depth(&self, project: &ProjectId) -> Option<u32> {
        self.inner
            .get()
            .and_then(|d| d.max_recursion_depth(project))
    }

    fn is_spawning_tool(&self, tool: &str) -> bool {
        tool == "session_spawn"
    }
}

/// [`RelayDispatcher`] over the shared registry and context.
pub struct RegistryDispatcher {
    ctx: AppContext,
    registry: Arc<ToolRegistry>,
}

impl RegistryDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(ctx: AppContext, registry: Arc<ToolRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// Rebuild the caller's identity from the stored session record. The
    /// container's self-reported identity is only trusted to *name* the
    /// session; scope comes from what the host persisted at spawn.
    fn stored_identity(&self, identity: &RelayIdentity) -> Result<AuthIdentity, RelayError> {
        let record = self
            .ctx
            .sessions
            .get(&identity.session_id)
            .map_err(|_| RelayError::UnknownSession(identity.session_id.to_string()))?;
        if record.project_id != identity.project_id {
            return Err(RelayError::Denied(format!(
                "session {} does not belong to project {}",
                identity.session_id, identity.project_id
            )));
        }
        let scope: Scope = record
            .creator_scope
            .parse()
            .map_err(|_| RelayError::Denied("stored creator scope no longer parses".into()))?;
        Ok(AuthIdentity {
            token_id: record.creator_token_id,
            scope,
        })
    }
}

#[async_trait]
impl RelayDispatcher for RegistryDispatcher {
    async fn list_tools(&self, identity: &RelayIdentity) -> Result<Value, RelayError> {
        let stored = self.stored_identity(identity)?;
        Ok(serde_json::json!({
            "tools": self.registry.list_for(&stored.scope),
        }))
    }

    async fn call_tool(
        &self,
        identity: &RelayIdentity,
        tool: &str,
        mut args: Value,
    ) -> Result<Value, RelayError> {
        let stored = self.stored_identity(identity)?;
        // A spawn from inside a container is a nested spawn by definition;
        // the host attributes the parent, never the container.
        if tool == "session_spawn" {
            if let Some(object) = args.as_object_mut() {
                let _ = object.insert(
                    "parent_session_id".to_owned(),
                    Value::String(identity.session_id.to_string()),
                );
            }
        }
        self.registry
            .call(&self.ctx, &stored, tool, args)
            .await
            .map_err(|e| RelayError::dispatch(e.kind, e.message))
    }

    fn max_recursion_depth(&self, project: &ProjectId) -> Option<u32> {
        self.ctx
            .projects
            .get(project)
            .ok()
            .map(|record| record.limits.max_recursion_depth)
    }

    fn is_spawning_tool(&self, tool: &str) -> bool {
        tool == "session_spawn"
    }
}
