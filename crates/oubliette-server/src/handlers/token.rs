//! `token_*` tools. Admin-only.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use oubliette_auth::AuthIdentity;
use oubliette_core::{TokenId, ToolAccess, ToolTarget};

use crate::context::AppContext;
use crate::errors::McpError;
use crate::handlers::parse_args;
use crate::registry::{object_schema, ProjectSource, ToolDef, ToolHandler, ToolRegistry};

/// Register the token tool family.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(ToolDef {
        name: "token_create",
        description: "Issue a bearer token; the secret is shown once",
        target: ToolTarget::Global,
        access: ToolAccess::Admin,
        project_source: ProjectSource::None,
        schema: object_schema(
            json!({
                "name": {"type": "string"},
                "scope": {"type": "string"},
                "expires_in_days": {"type": "integer"},
            }),
            &["name", "scope"],
        ),
        handler: std::sync::Arc::new(Create),
    });
    registry.register(ToolDef {
        name: "token_list",
        description: "List tokens (secrets redacted)",
        target: ToolTarget::Global,
        access: ToolAccess::Admin,
        project_source: ProjectSource::None,
        schema: object_schema(json!({}), &[]),
        handler: std::sync::Arc::new(List),
    });
    registry.register(ToolDef {
        name: "token_revoke",
        description: "Revoke a bearer token",
        target: ToolTarget::Global,
        access: ToolAccess::Admin,
        project_source: ProjectSource::None,
        schema: object_schema(json!({"token_id": {"type": "string"}}), &["token_id"]),
        handler: std::sync::Arc::new(Revoke),
    });
}

/// Redact a bearer for listings: prefix plus the last four characters.
fn redact(token: &TokenId) -> String {
    let s = token.as_str();
    if s.len() <= 12 {
        return "oub_****".to_owned();
    }
    format!("oub_…{}", &s[s.len() - 4..])
}

#[derive(Deserialize)]
struct CreateArgs {
    name: String,
    scope: String,
    #[serde(default)]
    expires_in_days: Option<i64>,
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
        let expires_at = args.expires_in_days.map(|days| Utc::now() + Duration::days(days));
        let record = ctx.tokens.issue(&args.name, &args.scope, expires_at)?;
        Ok(json!({
            "token": record.id.as_str(),
            "name": record.name,
            "scope": record.scope,
            "expires_at": record.expires_at,
        }))
    }
}

struct List;

#[async_trait]
impl ToolHandler for List {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        _args: Value,
    ) -> Result<Value, McpError> {
        let tokens: Vec<Value> = ctx
            .tokens
            .list()?
            .iter()
            .map(|t| {
                json!({
                    "token": redact(&t.id),
                    "name": t.name,
                    "scope": t.scope,
                    "created_at": t.created_at,
                    "last_used_at": t.last_used_at,
                    "expires_at": t.expires_at,
                })
            })
            .collect();
        Ok(json!({ "tokens": tokens }))
    }
}

#[derive(Deserialize)]
struct RevokeArgs {
    token_id: TokenId,
}

struct Revoke;

#[async_trait]
impl ToolHandler for Revoke {
    async fn handle(
        &self,
        ctx: &AppContext,
        _identity: &AuthIdentity,
        args: Value,
    ) -> Result<Value, McpError> {
        let args: RevokeArgs = parse_args(args)?;
        let revoked = ctx.tokens.revoke(&args.token_id)?;
        Ok(json!({ "revoked": revoked }))
    }
}
