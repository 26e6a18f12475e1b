//! Container glue: bring a project's container up before a session needs
//! it, tear it down on project stop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use oubliette_container::{
    ContainerRuntime, ContainerSpec, ContainerStatus, Mount,
};

use crate::errors::ProjectError;
use crate::layout::ProjectPaths;
use crate::types::ProjectRecord;

/// Seam the session manager uses to get a project's container ready.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Ensure the project's container exists and is running.
    async fn ensure_ready(&self, record: &ProjectRecord) -> Result<(), ProjectError>;

    /// Stop the project's container. The relay socket directory is removed
    /// by the relay layer.
    async fn stop(&self, record: &ProjectRecord) -> Result<(), ProjectError>;

    /// Remove the project's container entirely (project deletion).
    async fn remove(&self, record: &ProjectRecord) -> Result<(), ProjectError>;
}

/// [`Provisioner`] over a real container runtime.
pub struct ProjectSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    paths: ProjectPaths,
}

impl ProjectSupervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, paths: ProjectPaths) -> Self {
        Self { runtime, paths }
    }

    fn spec(&self, record: &ProjectRecord) -> ContainerSpec {
        let mounts: Vec<Mount> = self.paths.mounts(record);
        ContainerSpec {
            name: record.container_name(),
            image: record.image.clone(),
            mounts,
            env: std::collections::HashMap::new(),
            working_dir: "/workspace".into(),
        }
    }
}

#[async_trait]
impl Provisioner for ProjectSupervisor {
    async fn ensure_ready(&self, record: &ProjectRecord) -> Result<(), ProjectError> {
        let name = record.container_name();
        match self.runtime.status(&name).await {
            Ok(state) if state.status == ContainerStatus::Running => {
                return Ok(());
            }
            Ok(_) => {
                debug!(container = %name, "starting existing container");
                self.runtime.start(&name).await?;
                return Ok(());
            }
            Err(oubliette_container::ContainerError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if !self.runtime.image_exists(&record.image).await? {
            info!(image = %record.image, "pulling image");
            self.runtime.pull(&record.image).await?;
        }

        std::fs::create_dir_all(self.paths.socket_dir(&record.id))?;
        self.runtime.create(&self.spec(record)).await?;
        self.runtime.start(&name).await?;
        info!(container = %name, "container started");
        Ok(())
    }

    async fn stop(&self, record: &ProjectRecord) -> Result<(), ProjectError> {
        match self.runtime.stop(&record.container_name()).await {
            Ok(()) | Err(oubliette_container::ContainerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, record: &ProjectRecord) -> Result<(), ProjectError> {
        let name = record.container_name();
        let _ = self.runtime.stop(&name).await;
        match self.runtime.remove(&name).await {
            Ok(()) | Err(oubliette_container::ContainerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oubliette_container::FakeRuntime;
    use oubliette_core::config::{AgentConfig, ProjectLimits};
    use oubliette_core::{ProjectId, WorkspaceId};
    use tempfile::TempDir;

    fn make_record() -> ProjectRecord {
        let ws = crate::types::WorkspaceRecord {
            id: WorkspaceId::new(),
            name: "default".into(),
            dir_name: "default".into(),
            created_at: Utc::now(),
        };
        ProjectRecord {
            id: ProjectId::from("proj_sup"),
            name: "sup".into(),
            container_type: "base".into(),
            image: "oubliette/base:latest".into(),
            agent: AgentConfig::default(),
            limits: ProjectLimits::default(),
            credential_providers: Vec::new(),
            default_workspace_id: ws.id.clone(),
            workspaces: vec![ws],
            created_at: Utc::now(),
        }
    }

    fn make_supervisor(dir: &TempDir) -> (Arc<FakeRuntime>, ProjectSupervisor) {
        let fake = Arc::new(FakeRuntime::new());
        let paths = ProjectPaths::new(dir.path().join("projects"), dir.path().join("sockets"));
        let supervisor = ProjectSupervisor::new(fake.clone(), paths);
        (fake, supervisor)
    }

    #[tokio::test]
    async fn ensure_ready_pulls_creates_starts() {
        let dir = TempDir::new().unwrap();
        let (fake, supervisor) = make_supervisor(&dir);
        let record = make_record();

        supervisor.ensure_ready(&record).await.unwrap();

        assert_eq!(fake.pull_calls(), 1);
        let spec = fake.spec_of(&record.container_name()).unwrap();
        assert_eq!(spec.image, "oubliette/base:latest");
        assert_eq!(spec.mounts.len(), 3);
        assert!(dir.path().join("sockets/proj_sup").exists());
    }

    #[tokio::test]
    async fn ensure_ready_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (fake, supervisor) = make_supervisor(&dir);
        let record = make_record();

        supervisor.ensure_ready(&record).await.unwrap();
        supervisor.ensure_ready(&record).await.unwrap();
        // One create; second call sees a running container
        assert_eq!(fake.pull_calls(), 1);
    }

    #[tokio::test]
    async fn ensure_ready_restarts_stopped_container() {
        let dir = TempDir::new().unwrap();
        let (fake, supervisor) = make_supervisor(&dir);
        let record = make_record();

        supervisor.ensure_ready(&record).await.unwrap();
        supervisor.stop(&record).await.unwrap();
        supervisor.ensure_ready(&record).await.unwrap();

        let state = fake.status(&record.container_name()).await.unwrap();
        assert_eq!(state.status, ContainerStatus::Running);
        // No second pull or create
        assert_eq!(fake.pull_calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_runtime_propagates() {
        let dir = TempDir::new().unwrap();
        let (fake, supervisor) = make_supervisor(&dir);
        fake.set_unavailable(true);
        let err = supervisor.ensure_ready(&make_record()).await.unwrap_err();
        assert_eq!(
            oubliette_core::Fault::kind(&err),
            oubliette_core::ErrorKind::Unavailable
        );
    }

    #[tokio::test]
    async fn stop_and_remove_tolerate_missing() {
        let dir = TempDir::new().unwrap();
        let (_fake, supervisor) = make_supervisor(&dir);
        let record = make_record();
        supervisor.stop(&record).await.unwrap();
        supervisor.remove(&record).await.unwrap();
    }
}
