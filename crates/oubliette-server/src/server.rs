//! The HTTP front door: `POST /mcp` and `GET /health`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics::{counter, histogram};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use oubliette_relay::{RpcErrorBody, RpcResponse};

use crate::context::AppContext;
use crate::errors::McpError;
use crate::registry::ToolRegistry;

/// JSON-RPC parse error.
const PARSE_ERROR: i64 = -32700;
/// JSON-RPC invalid request.
const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC method not found.
const METHOD_NOT_FOUND: i64 = -32601;
/// Reserved in-band code for rate limiting.
const RATE_LIMITED: i64 = -32029;

/// Shared state for the axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: AppContext,
    registry: Arc<ToolRegistry>,
}

/// The MCP server.
pub struct OublietteServer {
    ctx: AppContext,
    registry: Arc<ToolRegistry>,
}

impl OublietteServer {
    /// Create a server over the shared context and registry.
    #[must_use]
    pub fn new(ctx: AppContext, registry: Arc<ToolRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// Build the router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            registry: self.registry.clone(),
        };
        Router::new()
            .route("/mcp", post(mcp_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(120),
            ))
    }

    /// Bind and serve. Returns the bound address and the server task.
    pub async fn listen(
        &self,
        address: &str,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let listener = TcpListener::bind(address).await?;
        let bound_addr = listener.local_addr()?;
        info!(addr = %bound_addr, tools = self.registry.len(), "mcp server started");

        let router = self.router();
        let shutdown_token = self.ctx.shutdown.token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });
        Ok((bound_addr, handle))
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let active = state
        .ctx
        .sessions
        .list(&oubliette_store::repositories::SessionFilter {
            live_only: true,
            ..Default::default()
        })
        .map(|s| s.len())
        .unwrap_or(0);
    Json(json!({
        "status": "ok",
        "uptime_secs": state.ctx.start_time.elapsed().as_secs(),
        "active_sessions": active,
        "scheduler_running": !state.ctx.shutdown.is_shutting_down(),
    }))
}

/// POST /mcp — the JSON-RPC 2.0 dispatcher.
async fn mcp_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let started = Instant::now();

    let Ok(request) = serde_json::from_str::<Value>(&body) else {
        return envelope(error_response(Value::Null, PARSE_ERROR, "parse error"), None);
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return envelope(
            error_response(id, INVALID_REQUEST, "missing method"),
            None,
        );
    };
    let method = method.to_owned();
    counter!("mcp_requests_total", "method" => method.clone()).increment(1);

    // Bearer only; any other scheme is a missing credential.
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let identity = match state.ctx.tokens.validate(bearer) {
        Ok(identity) => identity,
        Err(e) => {
            // Unauthenticated traffic is limited by source address before
            // the rejection goes out.
            let key = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unauthenticated");
            if let Err(wait) = state.ctx.limiter.check(key) {
                return rate_limited(id, wait);
            }
            let err = McpError::from_fault(&e);
            counter!("mcp_errors_total", "method" => method, "error" => "authentication")
                .increment(1);
            return envelope(error_response(id, err.code(), &err.message), None);
        }
    };

    // Rate limit after auth so the key is stable per token.
    if let Err(wait) = state.ctx.limiter.check(identity.token_id.as_str()) {
        counter!("mcp_errors_total", "method" => method, "error" => "rate_limited").increment(1);
        return rate_limited(id, wait);
    }

    let response = match method.as_str() {
        "tools/list" => RpcResponse::success(
            id,
            json!({ "tools": state.registry.list_for(&identity.scope) }),
        ),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(json!({}));
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return envelope(
                    error_response(id, INVALID_REQUEST, "tools/call requires params.name"),
                    None,
                );
            };
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            match state
                .registry
                .call(&state.ctx, &identity, name, arguments)
                .await
            {
                Ok(result) => RpcResponse::success(id, result),
                Err(err) => {
                    counter!(
                        "mcp_errors_total",
                        "method" => method.clone(),
                        "error" => err.kind.to_string()
                    )
                    .increment(1);
                    error_response(id, err.code(), &err.message)
                }
            }
        }
        _ => error_response(id, METHOD_NOT_FOUND, &format!("method '{method}' not found")),
    };

    let duration = started.elapsed();
    histogram!("mcp_request_duration_seconds", "method" => method.clone())
        .record(duration.as_secs_f64());
    if duration.as_secs() >= 5 {
        warn!(method, duration_secs = duration.as_secs_f64(), "slow mcp request");
    }

    envelope(response, None)
}

fn error_response(id: Value, code: i64, message: &str) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_owned(),
        id,
        result: None,
        error: Some(RpcErrorBody {
            code,
            message: message.to_owned(),
        }),
    }
}

fn rate_limited(id: Value, wait: Duration) -> Response {
    let secs = wait.as_secs().max(1);
    envelope(
        error_response(id, RATE_LIMITED, "rate limited"),
        Some(secs),
    )
}

fn envelope(response: RpcResponse, retry_after_secs: Option<u64>) -> Response {
    let mut http = Json(response).into_response();
    if let Some(secs) = retry_after_secs {
        if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
            let _ = http.headers_mut().insert("retry-after", value);
        }
    }
    http
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStack;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(router: &Router, token: Option<&str>, body: Value) -> (StatusCode, Value, HeaderMap) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value, headers)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let stack = TestStack::new().await;
        let router = stack.router();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
        assert!(value["uptime_secs"].is_number());
        assert!(value["active_sessions"].is_number());
    }

    #[tokio::test]
    async fn missing_bearer_is_auth_error() {
        let stack = TestStack::new().await;
        let (_, value, _) = send(
            &stack.router(),
            None,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;
        assert_eq!(value["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn unknown_bearer_is_auth_error() {
        let stack = TestStack::new().await;
        let (_, value, _) = send(
            &stack.router(),
            Some("oub_0000000000000000000000000000000000000000000000000000000000000000"),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;
        assert_eq!(value["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn parse_error_code() {
        let stack = TestStack::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from("{ nope"))
            .unwrap();
        let response = stack.router().oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn unknown_method_code() {
        let stack = TestStack::new().await;
        let (_, value, _) = send(
            &stack.router(),
            Some(stack.admin_token.as_str()),
            json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}),
        )
        .await;
        assert_eq!(value["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn tools_list_reflects_scope() {
        let stack = TestStack::new().await;
        let router = stack.router();

        let (_, admin, _) = send(
            &router,
            Some(stack.admin_token.as_str()),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;
        let admin_tools = admin["result"]["tools"].as_array().unwrap().len();

        let ro_token = stack.issue_token("viewer", "admin:ro");
        let (_, ro, _) = send(
            &router,
            Some(&ro_token),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;
        let ro_tools = ro["result"]["tools"].as_array().unwrap().len();

        assert!(admin_tools > ro_tools);
        assert!(ro["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .all(|t| !t["name"].as_str().unwrap().starts_with("token_")));
    }

    #[tokio::test]
    async fn per_token_rate_limits_are_independent() {
        let stack = TestStack::with_rate_limit(3.0, 3.0).await;
        let router = stack.router();
        let a = stack.issue_token("a", "admin");
        let b = stack.issue_token("b", "admin");

        // Each token burns its own burst; neither interferes with the other.
        for token in [&a, &b] {
            for i in 0..3 {
                let (_, value, _) = send(
                    &router,
                    Some(token),
                    json!({"jsonrpc": "2.0", "id": i, "method": "tools/list"}),
                )
                .await;
                assert!(value.get("error").is_none(), "request {i} for {token}");
            }
        }
        let (_, limited, headers) = send(
            &router,
            Some(&a),
            json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
        )
        .await;
        assert_eq!(limited["error"]["code"], -32029);
        assert!(headers.get("retry-after").is_some());

        let (_, fine, _) = send(
            &router,
            Some(&b),
            json!({"jsonrpc": "2.0", "id": 10, "method": "tools/list"}),
        )
        .await;
        // b still has refill headroom from elapsed time or fails with the
        // same structured error; either way it is judged on its own bucket
        if let Some(error) = fine.get("error") {
            assert_eq!(error["code"], -32029);
        }
    }

    #[tokio::test]
    async fn response_id_echoes_request_id() {
        let stack = TestStack::new().await;
        let (_, value, _) = send(
            &stack.router(),
            Some(stack.admin_token.as_str()),
            json!({"jsonrpc": "2.0", "id": "req-77", "method": "tools/list"}),
        )
        .await;
        assert_eq!(value["id"], "req-77");
    }
}
