//! On-disk layout for projects and relay sockets.
//!
//! ```text
//! <projects_base>/<project_id>/project.json      canonical config
//! <projects_base>/<project_id>/workspaces/<dir>  workspace trees
//! <sockets_base>/<project_id>/relay.sock         relay socket (active only)
//! ```

use std::path::{Path, PathBuf};

use oubliette_core::constants::RELAY_SOCKET_NAME;
use oubliette_core::ProjectId;

use crate::types::{ProjectRecord, WorkspaceRecord};

/// Resolves every path the control plane touches for a project.
#[derive(Clone, Debug)]
pub struct ProjectPaths {
    projects_base: PathBuf,
    sockets_base: PathBuf,
}

impl ProjectPaths {
    /// Create a resolver over the two base directories.
    #[must_use]
    pub fn new(projects_base: impl Into<PathBuf>, sockets_base: impl Into<PathBuf>) -> Self {
        Self {
            projects_base: sanitize(projects_base.into()),
            sockets_base: sanitize(sockets_base.into()),
        }
    }

    /// Root of all project directories.
    #[must_use]
    pub fn projects_base(&self) -> &Path {
        &self.projects_base
    }

    /// A project's directory.
    #[must_use]
    pub fn project_dir(&self, id: &ProjectId) -> PathBuf {
        self.projects_base.join(id.as_str())
    }

    /// A project's canonical config file.
    #[must_use]
    pub fn config_file(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join("project.json")
    }

    /// A project's workspaces directory.
    #[must_use]
    pub fn workspaces_dir(&self, id: &ProjectId) -> PathBuf {
        self.project_dir(id).join("workspaces")
    }

    /// One workspace's directory on the host.
    #[must_use]
    pub fn workspace_dir(&self, id: &ProjectId, workspace: &WorkspaceRecord) -> PathBuf {
        self.workspaces_dir(id).join(&workspace.dir_name)
    }

    /// A project's relay socket directory.
    #[must_use]
    pub fn socket_dir(&self, id: &ProjectId) -> PathBuf {
        self.sockets_base.join(id.as_str())
    }

    /// The relay socket path itself.
    #[must_use]
    pub fn socket_path(&self, id: &ProjectId) -> PathBuf {
        self.socket_dir(id).join(RELAY_SOCKET_NAME)
    }

    /// Working directory of a workspace as seen inside the container.
    #[must_use]
    pub fn container_workspace_dir(workspace: &WorkspaceRecord) -> PathBuf {
        PathBuf::from("/workspace").join(&workspace.dir_name)
    }

    /// Mounts for a project's container: workspace tree read-write, config
    /// read-only, socket dir read-write.
    #[must_use]
    pub fn mounts(&self, record: &ProjectRecord) -> Vec<oubliette_container::Mount> {
        vec![
            oubliette_container::Mount {
                host_path: self.workspaces_dir(&record.id),
                container_path: PathBuf::from("/workspace"),
                read_only: false,
            },
            oubliette_container::Mount {
                host_path: self.config_file(&record.id),
                container_path: PathBuf::from("/etc/oubliette/project.json"),
                read_only: true,
            },
            oubliette_container::Mount {
                host_path: self.socket_dir(&record.id),
                container_path: PathBuf::from("/run/oubliette"),
                read_only: false,
            },
        ]
    }
}

fn sanitize(path: PathBuf) -> PathBuf {
    if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
