//! The scheduler's launcher, wired over the session manager.

use std::sync::Arc;

use async_trait::async_trait;

use oubliette_core::SessionId;
use oubliette_projects::ProjectRegistry;
use oubliette_scheduler::{LaunchError, LaunchRequest, ScheduleLauncher};
use oubliette_sessions::{SessionManager, SpawnOptions};
use oubliette_store::types::SessionPolicy;

/// Materializes schedule firings into sessions.
pub struct SessionLauncher {
    projects: Arc<ProjectRegistry>,
    sessions: Arc<SessionManager>,
}

impl SessionLauncher {
    /// Create a launcher.
    #[must_use]
    pub fn new(projects: Arc<ProjectRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self { projects, sessions }
    }
}

#[async_trait]
impl ScheduleLauncher for SessionLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<SessionId, LaunchError> {
        let project = self
            .projects
            .get(&request.project_id)
            .map_err(|e| LaunchError(e.to_string()))?;

        // `resume` reuses the schedule's still-active session; anything
        // else (policy `new`, no prior session, prior session detached)
        // spawns fresh.
        if request.session_policy == SessionPolicy::Resume {
            if let Some(session_id) = &request.reuse_session {
                if self.sessions.is_active(session_id) {
                    self.sessions
                        .message(session_id, &request.prompt, None)
                        .await
                        .map_err(|e| LaunchError(e.to_string()))?;
                    return Ok(session_id.clone());
                }
            }
        }

        let workspace = self
            .projects
            .resolve_workspace(&request.project_id, request.workspace_id.as_ref())
            .map_err(|e| LaunchError(e.to_string()))?;

        let (record, _subscription) = self
            .sessions
            .spawn(SpawnOptions {
                project,
                workspace,
                parent_session_id: None,
                prompt: Some(request.prompt.clone()),
                creator_token_id: request.creator_token_id.clone(),
                creator_scope: request.creator_scope.clone(),
            })
            .await
            .map_err(|e| LaunchError(e.to_string()))?;
        Ok(record.id)
    }
}
