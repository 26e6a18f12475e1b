//! # oubliette
//!
//! Control-plane server binary: wires the store, auth, projects, sessions,
//! relay, scheduler, and MCP surface together, plus a small admin CLI for
//! tokens and configuration.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use oubliette_agent::sse::{BackendLauncher, SseRuntime, SseRuntimeConfig};
use oubliette_agent::AgentError;
use oubliette_auth::{RateLimiter, TokenService};
use oubliette_container::{ContainerRuntime, ExecSpec, FakeRuntime};
use oubliette_core::ProjectId;
use oubliette_projects::{ProjectDefaults, ProjectPaths, ProjectRegistry, ProjectSupervisor};
use oubliette_relay::RelayService;
use oubliette_scheduler::Scheduler;
use oubliette_server::dispatch::LateBoundDispatcher;
use oubliette_server::handlers::build_registry;
use oubliette_server::launcher::SessionLauncher;
use oubliette_server::{AppContext, OublietteServer, Settings, ShutdownCoordinator};
use oubliette_sessions::SessionManager;

/// Oubliette control plane.
#[derive(Parser, Debug)]
#[command(name = "oubliette", about = "Multi-tenant agent control plane")]
struct Cli {
    /// Path to the settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server.
    Serve {
        /// Bind address override.
        #[arg(long)]
        address: Option<String>,
    },
    /// Token administration.
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a token; the secret prints once.
    Create {
        /// Operator-visible label.
        #[arg(long)]
        name: String,
        /// Scope string (`admin`, `admin:ro`, `project:<id>`, `project:<id>:ro`).
        #[arg(long)]
        scope: String,
        /// Days until expiry; omit for a non-expiring token.
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// List tokens with secrets redacted.
    List,
    /// Revoke a token.
    Revoke {
        /// The bearer string to revoke.
        #[arg(long)]
        token: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print a starter configuration.
    Example,
}

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings =
        Settings::load(&config_path).map_err(|e| anyhow::anyhow!("loading settings: {e}"))?;

    match cli.command {
        Command::Serve { address } => serve(settings, address),
        Command::Token { command } => token_admin(&settings, &command),
        Command::Config { command } => match command {
            ConfigCommand::Example => {
                println!("{}", Settings::example_json());
                Ok(())
            }
        },
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,oubliette=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_pool(settings: &Settings) -> Result<oubliette_store::ConnectionPool> {
    ensure_parent_dir(&settings.db_path)?;
    let pool = oubliette_store::new_file(
        &settings.db_path,
        &oubliette_store::ConnectionConfig::default(),
    )
    .context("opening database")?;
    {
        let conn = pool.get().context("getting migration connection")?;
        let _ = oubliette_store::run_migrations(&conn).context("running migrations")?;
    }
    Ok(pool)
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}

fn token_admin(settings: &Settings, command: &TokenCommand) -> Result<()> {
    let pool = open_pool(settings)?;
    let tokens = TokenService::new(pool);
    match command {
        TokenCommand::Create {
            name,
            scope,
            expires_in_days,
        } => {
            let expires_at = expires_in_days.map(|d| chrono::Utc::now() + chrono::Duration::days(d));
            let record = tokens
                .issue(name, scope, expires_at)
                .map_err(|e| anyhow::anyhow!("issuing token: {e}"))?;
            println!("{}", record.id);
            Ok(())
        }
        TokenCommand::List => {
            for token in tokens.list().map_err(|e| anyhow::anyhow!("{e}"))? {
                let secret = token.id.as_str();
                let shown = if secret.len() > 12 {
                    format!("oub_…{}", &secret[secret.len() - 4..])
                } else {
                    "oub_****".to_owned()
                };
                println!(
                    "{shown}  {}  {}  last_used={}",
                    token.name,
                    token.scope,
                    token
                        .last_used_at
                        .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339()),
                );
            }
            Ok(())
        }
        TokenCommand::Revoke { token } => {
            let revoked = tokens
                .revoke(&oubliette_core::TokenId::from(token.as_str()))
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            if !revoked {
                anyhow::bail!("no such token");
            }
            println!("revoked");
            Ok(())
        }
    }
}

fn serve(settings: Settings, address: Option<String>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(serve_async(settings, address))
}

async fn serve_async(settings: Settings, address: Option<String>) -> Result<()> {
    let address = address.unwrap_or_else(|| settings.server.address.clone());
    let settings = Arc::new(settings);

    let pool = open_pool(&settings)?;
    let tokens = Arc::new(TokenService::new(pool.clone()));

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
        .map_err(|e| anyhow::anyhow!("opening project registry: {e}"))?,
    );

    // Container drivers are compile-time collaborators; this build carries
    // only the in-memory runtime, which is fine for development and tests
    // but holds no real workloads.
    let container: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new());
    warn!("no container driver compiled in; using the in-memory runtime");
    let provisioner = Arc::new(ProjectSupervisor::new(container.clone(), paths));

    let backend_launcher = Arc::new(ExecBackendLauncher::new(container.clone()));
    let agent_runtime = Arc::new(SseRuntime::new(backend_launcher, SseRuntimeConfig::default()));

    let sessions = SessionManager::new(pool.clone(), agent_runtime, provisioner.clone());
    let scheduler = Scheduler::new(
        pool,
        Arc::new(SessionLauncher::new(projects.clone(), sessions.clone())),
    );

    let dispatcher = LateBoundDispatcher::new();
    let relay = RelayService::new(dispatcher.clone());
    let registry = Arc::new(build_registry());
    let shutdown = Arc::new(ShutdownCoordinator::new());

    let ctx = AppContext {
        projects,
        sessions: sessions.clone(),
        scheduler: scheduler.clone(),
        tokens,
        relay,
        provisioner,
        container,
        settings: settings.clone(),
        limiter: Arc::new(RateLimiter::default()),
        shutdown: shutdown.clone(),
        start_time: Instant::now(),
    };
    dispatcher.bind(ctx.clone(), registry.clone());

    // Background loops: scheduler ticks and limiter cleanup.
    shutdown.register_task(scheduler.start(shutdown.token()));
    {
        let limiter = ctx.limiter.clone();
        let token = shutdown.token();
        shutdown.register_task(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        let _ = limiter.cleanup();
                    }
                }
            }
        }));
    }

    let server = OublietteServer::new(ctx, registry);
    let (bound, server_task) = server
        .listen(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(addr = %bound, "oubliette ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    shutdown
        .graceful_shutdown(Some(std::time::Duration::from_secs(30)))
        .await;
    sessions.shutdown().await;
    let _ = server_task.await;
    Ok(())
}

/// Starts the per-project agent backend by exec'ing it inside the
/// project's container and exposing it on a loopback port.
struct ExecBackendLauncher {
    container: Arc<dyn ContainerRuntime>,
    next_port: std::sync::atomic::AtomicU16,
    ports: parking_lot::Mutex<std::collections::HashMap<String, u16>>,
}

impl ExecBackendLauncher {
    fn new(container: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            container,
            next_port: std::sync::atomic::AtomicU16::new(42700),
            ports: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl BackendLauncher for ExecBackendLauncher {
    async fn launch(&self, project: &ProjectId) -> Result<String, AgentError> {
        if let Some(port) = self.ports.lock().get(project.as_str()).copied() {
            return Ok(format!("http://127.0.0.1:{port}"));
        }
        let port = self
            .next_port
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let spec = ExecSpec {
            command: vec![
                "oubliette-backend".to_owned(),
                "serve".to_owned(),
                "--port".to_owned(),
                port.to_string(),
            ],
            env: std::collections::HashMap::new(),
            working_dir: None,
        };
        let _ = self
            .container
            .exec(&format!("oubliette-{project}"), &spec)
            .await
            .map_err(|e| AgentError::Unavailable(e.to_string()))?;
        let _ = self.ports.lock().insert(project.as_str().to_owned(), port);
        Ok(format!("http://127.0.0.1:{port}"))
    }

    async fn terminate(&self, project: &ProjectId) -> Result<(), AgentError> {
        let _ = self.ports.lock().remove(project.as_str());
        Ok(())
    }
}
