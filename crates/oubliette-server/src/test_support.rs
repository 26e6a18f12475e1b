//! Full-stack fixture for this crate's tests: fake container runtime, fake
//! agent backend, real everything else.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tempfile::TempDir;

use oubliette_agent::FakeAgentRuntime;
use oubliette_auth::{RateLimiter, RateLimiterConfig, TokenService};
use oubliette_container::FakeRuntime;
use oubliette_projects::{ProjectDefaults, ProjectPaths, ProjectRegistry, ProjectSupervisor};
use oubliette_relay::RelayService;
use oubliette_scheduler::Scheduler;
use oubliette_sessions::SessionManager;

use crate::context::AppContext;
use crate::dispatch::LateBoundDispatcher;
use crate::handlers::build_registry;
use crate::launcher::SessionLauncher;
use crate::registry::ToolRegistry;
use crate::server::OublietteServer;
use crate::settings::Settings;
use crate::shutdown::ShutdownCoordinator;

/// A wired stack with one pre-issued admin token.
pub struct TestStack {
    /// The shared context.
    pub ctx: AppContext,
    /// The tool registry.
    pub registry: Arc<ToolRegistry>,
    /// Admin bearer issued at construction.
    pub admin_token: String,
    /// The fake agent runtime, for scripting and call counts.
    pub agent_runtime: Arc<FakeAgentRuntime>,
    /// The fake container runtime.
    pub container_runtime: Arc<FakeRuntime>,
    _tmp: TempDir,
}

impl TestStack {
    /// A stack with an effectively unlimited rate limiter.
    pub async fn new() -> Self {
        Self::with_rate_limit(10_000.0, 10_000.0).await
    }

    /// A stack with specific rate-limiter tuning.
    pub async fn with_rate_limit(per_second: f64, burst: f64) -> Self {
        let tmp = TempDir::new().expect("tempdir");

        let mut settings = Settings::default();
        settings.projects_dir = tmp.path().join("projects");
        settings.sockets_dir = tmp.path().join("sockets");
        settings.db_path = tmp.path().join("oubliette.db");
        settings.defaults.agent.model = "test-model".to_owned();
        let settings = Arc::new(settings);

        let pool = oubliette_store::open_test_pool();
        let tokens = Arc::new(TokenService::new(pool.clone()));
        let admin = tokens
            .issue("test-admin", "admin", None)
            .expect("admin token");

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
            .expect("project registry"),
        );

        let container_runtime = Arc::new(FakeRuntime::new());
        container_runtime.add_image("ghcr.io/oubliette/base:latest");
        let provisioner = Arc::new(ProjectSupervisor::new(container_runtime.clone(), paths));

        let agent_runtime = Arc::new(FakeAgentRuntime::new());
        let sessions = SessionManager::new(
            pool.clone(),
            agent_runtime.clone(),
            provisioner.clone(),
        );

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
            container: container_runtime.clone(),
            settings,
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig {
                per_second,
                burst,
                idle_expiry: std::time::Duration::from_secs(600),
            })),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        };
        dispatcher.bind(ctx.clone(), registry.clone());

        Self {
            ctx,
            registry,
            admin_token: admin.id.into_inner(),
            agent_runtime,
            container_runtime,
            _tmp: tmp,
        }
    }

    /// A router over the stack.
    #[must_use]
    pub fn router(&self) -> Router {
        OublietteServer::new(self.ctx.clone(), self.registry.clone()).router()
    }

    /// Issue an extra token and return the bearer string.
    pub fn issue_token(&self, name: &str, scope: &str) -> String {
        self.ctx
            .tokens
            .issue(name, scope, None)
            .expect("token")
            .id
            .into_inner()
    }
}
