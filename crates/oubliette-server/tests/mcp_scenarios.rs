//! End-to-end scenarios over the full MCP surface with fake container and
//! agent backends: lifecycle loops, depth caps through the relay, scope
//! gating, and schedule firing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tower::ServiceExt;

use oubliette_agent::FakeAgentRuntime;
use oubliette_auth::{RateLimiter, RateLimiterConfig, TokenService};
use oubliette_container::FakeRuntime;
use oubliette_projects::{ProjectDefaults, ProjectPaths, ProjectRegistry, ProjectSupervisor};
use oubliette_relay::RelayService;
use oubliette_scheduler::Scheduler;
use oubliette_server::dispatch::LateBoundDispatcher;
use oubliette_server::handlers::build_registry;
use oubliette_server::launcher::SessionLauncher;
use oubliette_server::{AppContext, OublietteServer, Settings, ShutdownCoordinator};
use oubliette_sessions::SessionManager;

struct Stack {
    ctx: AppContext,
    router: Router,
    admin_token: String,
    agent_runtime: Arc<FakeAgentRuntime>,
    sockets_dir: std::path::PathBuf,
    _tmp: TempDir,
}

fn build_stack() -> Stack {
    let tmp = TempDir::new().unwrap();

    let mut settings = Settings::default();
    settings.projects_dir = tmp.path().join("projects");
    settings.sockets_dir = tmp.path().join("sockets");
    settings.defaults.agent.model = "test-model".to_owned();
    let sockets_dir = settings.sockets_dir.clone();
    let settings = Arc::new(settings);

    let pool = oubliette_store::open_test_pool();
    let tokens = Arc::new(TokenService::new(pool.clone()));
    let admin = tokens.issue("admin", "admin", None).unwrap();

    let paths = ProjectPaths::new(&settings.projects_dir, &settings.sockets_dir);
    let projects = Arc::new(
        ProjectRegistry::open(
            paths.clone(),
            ProjectDefaults {
                container_type: settings.defaults.container.container_type.clone(),
                container_images: settings.containers.clone(),
                agent: settings.defaults.agent.clone(),
                limits: settings.defaults.limits,
            },
        )
        .unwrap(),
    );

    let container_runtime = Arc::new(FakeRuntime::new());
    container_runtime.add_image("ghcr.io/oubliette/base:latest");
    let provisioner = Arc::new(ProjectSupervisor::new(container_runtime.clone(), paths));

    let agent_runtime = Arc::new(FakeAgentRuntime::new());
    let sessions = SessionManager::new(pool.clone(), agent_runtime.clone(), provisioner.clone());
    let scheduler = Scheduler::new(
        pool,
        Arc::new(SessionLauncher::new(projects.clone(), sessions.clone())),
    );

    let dispatcher = LateBoundDispatcher::new();
    let relay = RelayService::new(dispatcher.clone());
    let registry = Arc::new(build_registry());

    let ctx = AppContext {
        projects,
        sessions,
        scheduler,
        tokens,
        relay,
        provisioner,
        container: container_runtime,
        settings,
        limiter: Arc::new(RateLimiter::new(RateLimiterConfig {
            per_second: 10_000.0,
            burst: 10_000.0,
            idle_expiry: Duration::from_secs(600),
        })),
        shutdown: Arc::new(ShutdownCoordinator::new()),
        start_time: Instant::now(),
    };
    dispatcher.bind(ctx.clone(), registry.clone());

    let router = OublietteServer::new(ctx.clone(), registry).router();
    Stack {
        ctx,
        router,
        admin_token: admin.id.into_inner(),
        agent_runtime,
        sockets_dir,
        _tmp: tmp,
    }
}

async fn rpc(stack: &Stack, token: &str, method: &str, params: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string(),
        ))
        .unwrap();
    let response = stack.router.clone().oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), 10_000_000)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn call_tool(stack: &Stack, token: &str, name: &str, arguments: Value) -> Value {
    rpc(
        stack,
        token,
        "tools/call",
        json!({"name": name, "arguments": arguments}),
    )
    .await
}

/// Poll session_events until a completion event shows up.
async fn events_until_completion(stack: &Stack, token: &str, session_id: &str) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let response = call_tool(
            stack,
            token,
            "session_events",
            json!({"session_id": session_id, "from_seq": 0, "max": 1000}),
        )
        .await;
        let events = response["result"]["events"].as_array().cloned().unwrap_or_default();
        if events.iter().any(|e| e["type"] == "completion") {
            return events;
        }
        assert!(Instant::now() < deadline, "no completion within deadline");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn spawn_message_end_resume_loop() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let project = call_tool(&stack, &admin, "project_create", json!({"name": "p1"})).await;
    let project_id = project["result"]["id"].as_str().unwrap().to_owned();
    assert!(project_id.starts_with("proj_"));
    let workspace_id = project["result"]["default_workspace_id"].as_str().unwrap().to_owned();

    let spawned = call_tool(
        &stack,
        &admin,
        "session_spawn",
        json!({"project_id": project_id, "workspace_id": workspace_id, "prompt": "hello"}),
    )
    .await;
    let session_id = spawned["result"]["id"].as_str().unwrap().to_owned();
    assert!(session_id.starts_with("sess_"));

    // The first turn carries at least one assistant message and exactly
    // one completion.
    let events = events_until_completion(&stack, &admin, &session_id).await;
    assert!(events
        .iter()
        .any(|e| e["type"] == "message" && e["role"] == "assistant"));
    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
    let first_turn_len = events.len();

    // Detach; the stored stream replays identically.
    let ended = call_tool(&stack, &admin, "session_end", json!({"session_id": session_id})).await;
    assert_eq!(ended["result"]["ok"], true);
    let replay = call_tool(
        &stack,
        &admin,
        "session_events",
        json!({"session_id": session_id, "from_seq": 0, "max": 1000}),
    )
    .await;
    assert_eq!(
        replay["result"]["events"].as_array().unwrap().len(),
        first_turn_len
    );

    // Resume and continue; the sequence keeps growing, never restarts.
    let resumed =
        call_tool(&stack, &admin, "session_resume", json!({"session_id": session_id})).await;
    assert_eq!(resumed["result"]["status"], "active");
    let messaged = call_tool(
        &stack,
        &admin,
        "session_message",
        json!({"session_id": session_id, "text": "again"}),
    )
    .await;
    assert_eq!(messaged["result"]["ok"], true);

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let all = call_tool(
            &stack,
            &admin,
            "session_events",
            json!({"session_id": session_id, "from_seq": 0, "max": 1000}),
        )
        .await;
        let count = all["result"]["events"].as_array().unwrap().len();
        if count > first_turn_len {
            break;
        }
        assert!(Instant::now() < deadline, "resumed turn never produced events");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn depth_cap_enforced_at_relay_before_any_spawn() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let project = call_tool(
        &stack,
        &admin,
        "project_create",
        json!({"name": "deep", "limits": {"max_recursion_depth": 2, "max_agents_per_session": 10}}),
    )
    .await;
    let project_id = project["result"]["id"].as_str().unwrap().to_owned();

    let root = call_tool(
        &stack,
        &admin,
        "session_spawn",
        json!({"project_id": project_id, "prompt": "root"}),
    )
    .await;
    let root_id = root["result"]["id"].as_str().unwrap().to_owned();
    let launches_after_root = stack.agent_runtime.execute_calls();

    // The in-container agent reaches back through the relay socket.
    let socket = stack.sockets_dir.join(&project_id).join("relay.sock");
    let stream = UnixStream::connect(&socket).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let spawn_line = |session: String, depth: u64| {
        json!({
            "jsonrpc": "2.0", "id": depth, "method": "oubliette_call_tool",
            "params": {
                "session_id": session, "project_id": project_id, "depth": depth,
                "tool": "session_spawn",
                "arguments": {"project_id": project_id, "prompt": "child"},
            },
        })
        .to_string()
            + "\n"
    };

    // Root (depth 0) spawns a child: allowed.
    write
        .write_all(spawn_line(root_id.clone(), 0).as_bytes())
        .await
        .unwrap();
    let response: Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let child_id = response["result"]["id"].as_str().expect("child spawned").to_owned();
    assert_eq!(response["result"]["depth"], 1);
    assert_eq!(stack.agent_runtime.execute_calls(), launches_after_root + 1);

    // The child (depth 1) tries to go deeper: stopped at the relay, and no
    // runtime launch happens.
    write
        .write_all(spawn_line(child_id, 1).as_bytes())
        .await
        .unwrap();
    let denied: Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(denied["error"]["code"], -32005);
    assert_eq!(stack.agent_runtime.execute_calls(), launches_after_root + 1);
}

#[tokio::test]
async fn scope_denial_is_uniform() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let p1 = call_tool(&stack, &admin, "project_create", json!({"name": "p1"})).await;
    let p1_id = p1["result"]["id"].as_str().unwrap().to_owned();
    let p2 = call_tool(&stack, &admin, "project_create", json!({"name": "p2"})).await;
    let p2_id = p2["result"]["id"].as_str().unwrap().to_owned();

    let scoped = stack
        .ctx
        .tokens
        .issue("p1-bot", &format!("project:{p1_id}"), None)
        .unwrap()
        .id
        .into_inner();
    let readonly = stack
        .ctx
        .tokens
        .issue("auditor", "admin:ro", None)
        .unwrap()
        .id
        .into_inner();

    // project-scoped token: own project readable, the other denied
    let own = call_tool(&stack, &scoped, "project_get", json!({"project_id": p1_id})).await;
    assert_eq!(own["result"]["id"], p1_id.as_str());
    let other = call_tool(&stack, &scoped, "project_get", json!({"project_id": p2_id})).await;
    assert_eq!(other["error"]["code"], -32002);

    // admin:ro reads anything but writes nothing
    let read = call_tool(&stack, &readonly, "project_get", json!({"project_id": p2_id})).await;
    assert_eq!(read["result"]["id"], p2_id.as_str());
    let write = call_tool(
        &stack,
        &readonly,
        "session_spawn",
        json!({"project_id": p1_id, "prompt": "x"}),
    )
    .await;
    assert_eq!(write["error"]["code"], -32002);

    // project tools without a project are denied, not mis-routed
    let missing = call_tool(&stack, &scoped, "project_get", json!({})).await;
    assert_eq!(missing["error"]["code"], -32002);
}

#[tokio::test]
async fn schedule_lifecycle_and_manual_trigger() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let project = call_tool(&stack, &admin, "project_create", json!({"name": "cronp"})).await;
    let project_id = project["result"]["id"].as_str().unwrap().to_owned();

    let created = call_tool(
        &stack,
        &admin,
        "schedule_create",
        json!({
            "name": "nightly",
            "cron": "0 9 * * *",
            "prompt": "summarize overnight work",
            "targets": [{"project_id": project_id}],
        }),
    )
    .await;
    let schedule_id = created["result"]["id"].as_str().unwrap().to_owned();
    assert!(created["result"]["next_run_at"].is_string());

    // cron update recomputes the next run
    let updated = call_tool(
        &stack,
        &admin,
        "schedule_update",
        json!({"schedule_id": schedule_id, "cron": "0 12 * * *"}),
    )
    .await;
    assert_eq!(updated["result"]["cron"], "0 12 * * *");
    assert_ne!(updated["result"]["next_run_at"], created["result"]["next_run_at"]);

    // manual trigger fires immediately without touching the clock
    let before = call_tool(&stack, &admin, "schedule_list", json!({})).await;
    let clock_before = before["result"]["schedules"][0]["next_run_at"].clone();

    let triggered = call_tool(
        &stack,
        &admin,
        "schedule_trigger",
        json!({"schedule_id": schedule_id}),
    )
    .await;
    let executions = triggered["result"]["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["status"], "success");
    assert!(executions[0]["session_id"].as_str().unwrap().starts_with("sess_"));

    let after = call_tool(&stack, &admin, "schedule_list", json!({})).await;
    assert_eq!(after["result"]["schedules"][0]["next_run_at"], clock_before);

    // the fired session exists in the project
    let sessions = call_tool(
        &stack,
        &admin,
        "session_list",
        json!({"project_id": project_id}),
    )
    .await;
    assert_eq!(sessions["result"]["sessions"].as_array().unwrap().len(), 1);

    // history is queryable
    let history = call_tool(
        &stack,
        &admin,
        "schedule_executions",
        json!({"schedule_id": schedule_id}),
    )
    .await;
    assert_eq!(history["result"]["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn project_delete_cascades() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let project = call_tool(&stack, &admin, "project_create", json!({"name": "doomed"})).await;
    let project_id = project["result"]["id"].as_str().unwrap().to_owned();

    let spawned = call_tool(
        &stack,
        &admin,
        "session_spawn",
        json!({"project_id": project_id, "prompt": "hi"}),
    )
    .await;
    let session_id = spawned["result"]["id"].as_str().unwrap().to_owned();

    let _ = call_tool(
        &stack,
        &admin,
        "schedule_create",
        json!({
            "name": "s", "cron": "* * * * *", "prompt": "x",
            "targets": [{"project_id": project_id}],
        }),
    )
    .await;

    let socket_dir = stack.sockets_dir.join(&project_id);
    assert!(socket_dir.exists());

    let deleted = call_tool(
        &stack,
        &admin,
        "project_delete",
        json!({"project_id": project_id}),
    )
    .await;
    assert_eq!(deleted["result"]["deleted"], true);

    // everything the project owned is gone
    assert!(!socket_dir.exists());
    let missing = call_tool(&stack, &admin, "project_get", json!({"project_id": project_id})).await;
    assert_eq!(missing["error"]["code"], -32004);
    let session = call_tool(&stack, &admin, "session_get", json!({"session_id": session_id})).await;
    assert_eq!(session["error"]["code"], -32004);
    let schedules = call_tool(&stack, &admin, "schedule_list", json!({})).await;
    assert!(schedules["result"]["schedules"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn relay_tools_reflect_stored_creator_scope() {
    let stack = build_stack();
    let admin = stack.admin_token.clone();

    let project = call_tool(&stack, &admin, "project_create", json!({"name": "p1"})).await;
    let project_id = project["result"]["id"].as_str().unwrap().to_owned();
    let spawned = call_tool(
        &stack,
        &admin,
        "session_spawn",
        json!({"project_id": project_id, "prompt": "hi"}),
    )
    .await;
    let session_id = spawned["result"]["id"].as_str().unwrap().to_owned();

    let socket = stack.sockets_dir.join(&project_id).join("relay.sock");
    let stream = UnixStream::connect(&socket).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let line = json!({
        "jsonrpc": "2.0", "id": 1, "method": "oubliette_tools",
        "params": {"session_id": session_id, "project_id": project_id, "depth": 0},
    })
    .to_string()
        + "\n";
    write.write_all(line.as_bytes()).await.unwrap();

    let response: Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let tools = response["result"]["tools"].as_array().unwrap();
    // creator was admin, so the full catalogue is visible through the relay
    assert!(tools.iter().any(|t| t["name"] == "token_create"));
    assert!(tools.iter().any(|t| t["name"] == "session_spawn"));
}
