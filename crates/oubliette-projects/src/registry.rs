//! The project registry.
//!
//! One JSON file per project under the projects base directory, with a
//! write-through in-memory cache. All mutation goes through the registry so
//! the cache and the files never diverge.

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use oubliette_core::config::{AgentConfig, ProjectLimits};
use oubliette_core::{ProjectId, WorkspaceId};

use crate::errors::ProjectError;
use crate::layout::ProjectPaths;
use crate::types::{ProjectCreateParams, ProjectRecord, WorkspaceRecord};

/// Server defaults applied when creation params omit a field.
#[derive(Clone, Debug)]
pub struct ProjectDefaults {
    /// Default container type name.
    pub container_type: String,
    /// Container-type name to image reference map.
    pub container_images: std::collections::HashMap<String, String>,
    /// Default agent config.
    pub agent: AgentConfig,
    /// Default limits.
    pub limits: ProjectLimits,
}

/// File-backed project registry.
pub struct ProjectRegistry {
    paths: ProjectPaths,
    defaults: ProjectDefaults,
    cache: DashMap<ProjectId, ProjectRecord>,
}

impl ProjectRegistry {
    /// Open a registry, loading every existing project config into the
    /// cache. Unreadable entries are skipped with a warning.
    pub fn open(paths: ProjectPaths, defaults: ProjectDefaults) -> Result<Self, ProjectError> {
        let registry = Self {
            paths,
            defaults,
            cache: DashMap::new(),
        };
        registry.load_existing()?;
        Ok(registry)
    }

    fn load_existing(&self) -> Result<(), ProjectError> {
        let base = self.paths.projects_base();
        if !base.exists() {
            std::fs::create_dir_all(base)?;
            return Ok(());
        }
        for entry in std::fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = ProjectId::from(entry.file_name().to_string_lossy().into_owned());
            let config = self.paths.config_file(&id);
            match std::fs::read_to_string(&config) {
                Ok(data) => match serde_json::from_str::<ProjectRecord>(&data) {
                    Ok(record) => {
                        let _ = self.cache.insert(record.id.clone(), record);
                    }
                    Err(e) => warn!(project = %id, error = %e, "skipping corrupt project config"),
                },
                Err(e) => warn!(project = %id, error = %e, "skipping unreadable project config"),
            }
        }
        debug!(projects = self.cache.len(), "project registry loaded");
        Ok(())
    }

    /// Create a project and its default workspace.
    pub fn create(&self, params: &ProjectCreateParams) -> Result<ProjectRecord, ProjectError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(ProjectError::Validation("project name is required".into()));
        }
        if self.cache.iter().any(|p| p.name == name) {
            return Err(ProjectError::DuplicateName(name.to_owned()));
        }

        let container_type = params
            .container_type
            .clone()
            .unwrap_or_else(|| self.defaults.container_type.clone());
        let image = self
            .defaults
            .container_images
            .get(&container_type)
            .cloned()
            .ok_or_else(|| {
                ProjectError::Validation(format!("unknown container type '{container_type}'"))
            })?;

        let default_workspace = WorkspaceRecord {
            id: WorkspaceId::new(),
            name: "default".to_owned(),
            dir_name: "default".to_owned(),
            created_at: Utc::now(),
        };

        let record = ProjectRecord {
            id: ProjectId::new(),
            name: name.to_owned(),
            container_type,
            image,
            agent: params.agent.clone().unwrap_or_else(|| self.defaults.agent.clone()),
            limits: params.limits.unwrap_or(self.defaults.limits),
            credential_providers: params.credential_providers.clone(),
            default_workspace_id: default_workspace.id.clone(),
            workspaces: vec![default_workspace],
            created_at: Utc::now(),
        };

        std::fs::create_dir_all(self.paths.workspaces_dir(&record.id))?;
        for workspace in &record.workspaces {
            std::fs::create_dir_all(self.paths.workspace_dir(&record.id, workspace))?;
        }
        self.persist(&record)?;
        let _ = self.cache.insert(record.id.clone(), record.clone());
        info!(project = %record.id, name = %record.name, "project created");
        Ok(record)
    }

    /// Fetch a project.
    pub fn get(&self, id: &ProjectId) -> Result<ProjectRecord, ProjectError> {
        self.cache
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    /// All projects, by creation time.
    pub fn list(&self) -> Vec<ProjectRecord> {
        let mut records: Vec<ProjectRecord> = self.cache.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Delete a project's registry entry and directory tree. Callers run
    /// the wider cascade (sessions, schedules, relay socket) first.
    pub fn delete(&self, id: &ProjectId) -> Result<ProjectRecord, ProjectError> {
        let (_, record) = self
            .cache
            .remove(id)
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))?;
        let dir = self.paths.project_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(project = %id, "project deleted");
        Ok(record)
    }

    /// Add a workspace to a project.
    pub fn create_workspace(
        &self,
        id: &ProjectId,
        name: &str,
    ) -> Result<WorkspaceRecord, ProjectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProjectError::Validation("workspace name is required".into()));
        }
        let mut entry = self
            .cache
            .get_mut(id)
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))?;
        if entry.workspaces.iter().any(|w| w.name == name) {
            return Err(ProjectError::Validation(format!(
                "workspace name '{name}' already in use"
            )));
        }

        let workspace = WorkspaceRecord {
            id: WorkspaceId::new(),
            name: name.to_owned(),
            dir_name: dir_name_for(name),
            created_at: Utc::now(),
        };
        std::fs::create_dir_all(self.paths.workspace_dir(id, &workspace))?;
        entry.workspaces.push(workspace.clone());
        let record = entry.clone();
        drop(entry);
        self.persist(&record)?;
        debug!(project = %id, workspace = %workspace.id, "workspace created");
        Ok(workspace)
    }

    /// Workspaces of a project.
    pub fn list_workspaces(&self, id: &ProjectId) -> Result<Vec<WorkspaceRecord>, ProjectError> {
        Ok(self.get(id)?.workspaces)
    }

    /// Resolve a workspace, falling back to the default when `workspace`
    /// is `None`.
    pub fn resolve_workspace(
        &self,
        id: &ProjectId,
        workspace: Option<&WorkspaceId>,
    ) -> Result<WorkspaceRecord, ProjectError> {
        let record = self.get(id)?;
        let target = workspace.unwrap_or(&record.default_workspace_id);
        record
            .workspace(target)
            .cloned()
            .ok_or_else(|| ProjectError::WorkspaceNotFound(target.to_string()))
    }

    /// Path resolver shared with the rest of the process.
    #[must_use]
    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    fn persist(&self, record: &ProjectRecord) -> Result<(), ProjectError> {
        let path = self.paths.config_file(&record.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ProjectError::Corrupt(e.to_string()))?;
        std::fs::write(&path, &json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }
        Ok(())
    }
}

/// A filesystem-safe directory name derived from a workspace name.
fn dir_name_for(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
