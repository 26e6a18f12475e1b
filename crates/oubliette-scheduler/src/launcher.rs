//! The seam between the scheduler and the session layer.
//!
//! The scheduler never talks to the session manager directly; the server
//! wires an implementation over it. Tests plug in fakes with controllable
//! latency and failure.

use async_trait::async_trait;
use thiserror::Error;

use oubliette_core::{ProjectId, ScheduleId, SessionId, TokenId, WorkspaceId};
use oubliette_store::types::SessionPolicy;

/// Why a launch failed; recorded verbatim in the execution row.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LaunchError(pub String);

/// One materialized firing against one target.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    /// The firing schedule.
    pub schedule_id: ScheduleId,
    /// Target project.
    pub project_id: ProjectId,
    /// Target workspace; `None` means the project default.
    pub workspace_id: Option<WorkspaceId>,
    /// The stored prompt to drive.
    pub prompt: String,
    /// Resume-vs-new policy.
    pub session_policy: SessionPolicy,
    /// Session this schedule previously created for the target, for the
    /// `resume` policy.
    pub reuse_session: Option<SessionId>,
    /// The schedule's creator, impersonated at fire time.
    pub creator_token_id: TokenId,
    /// The creator's stored scope string.
    pub creator_scope: String,
}

/// Materializes a firing into a session spawn or message.
#[async_trait]
pub trait ScheduleLauncher: Send + Sync {
    /// Drive the prompt into a session; returns the session that ran it.
    async fn launch(&self, request: &LaunchRequest) -> Result<SessionId, LaunchError>;
}
