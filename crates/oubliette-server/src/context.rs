//! Shared application context handed to every tool handler.

use std::sync::Arc;
use std::time::Instant;

use oubliette_auth::{RateLimiter, TokenService};
use oubliette_projects::{ProjectRegistry, Provisioner};
use oubliette_relay::RelayService;
use oubliette_scheduler::Scheduler;
use oubliette_sessions::SessionManager;

use crate::settings::Settings;
use crate::shutdown::ShutdownCoordinator;

/// Everything a handler can reach. No hidden process-wide state; all
/// cross-component calls go through these explicit references.
#[derive(Clone)]
pub struct AppContext {
    /// Project/workspace registry.
    pub projects: Arc<ProjectRegistry>,
    /// Session manager.
    pub sessions: Arc<SessionManager>,
    /// Scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Token store facade.
    pub tokens: Arc<TokenService>,
    /// Relay service.
    pub relay: Arc<RelayService>,
    /// Container glue.
    pub provisioner: Arc<dyn Provisioner>,
    /// Container runtime, for catalogue helpers (image pulls).
    pub container: Arc<dyn oubliette_container::ContainerRuntime>,
    /// Loaded settings.
    pub settings: Arc<Settings>,
    /// Per-key rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Process start, for the health endpoint.
    pub start_time: Instant,
}
