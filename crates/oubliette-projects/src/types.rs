//! Project and workspace records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use oubliette_core::config::{AgentConfig, ProjectLimits};
use oubliette_core::{ProjectId, WorkspaceId};

/// A named working directory inside a project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    /// Workspace ID.
    pub id: WorkspaceId,
    /// Operator-visible name.
    pub name: String,
    /// Directory name under the project's `workspaces/` directory.
    pub dir_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The canonical per-project record, persisted as one JSON file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project ID.
    pub id: ProjectId,
    /// Unique operator-visible name.
    pub name: String,
    /// Logical container type, resolved to an image at creation.
    pub container_type: String,
    /// Image reference resolved from the container type.
    pub image: String,
    /// Canonical agent config.
    pub agent: AgentConfig,
    /// Resource caps.
    pub limits: ProjectLimits,
    /// Names of credential sets this project references. Values never
    /// leave the server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credential_providers: Vec<String>,
    /// The workspace created with the project.
    pub default_workspace_id: WorkspaceId,
    /// All workspaces, default included.
    pub workspaces: Vec<WorkspaceRecord>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ProjectRecord {
    /// Container name for this project.
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("oubliette-{}", self.id)
    }

    /// Look up a workspace by ID.
    #[must_use]
    pub fn workspace(&self, id: &WorkspaceId) -> Option<&WorkspaceRecord> {
        self.workspaces.iter().find(|w| &w.id == id)
    }
}

/// Inputs for creating a project. Omitted fields fall back to server
/// defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProjectCreateParams {
    /// Unique name.
    pub name: String,
    /// Logical container type; default comes from server config.
    #[serde(default)]
    pub container_type: Option<String>,
    /// Agent config overrides.
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    /// Limit overrides.
    #[serde(default)]
    pub limits: Option<ProjectLimits>,
    /// Credential set names.
    #[serde(default)]
    pub credential_providers: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectRecord {
        let ws = WorkspaceRecord {
            id: WorkspaceId::new(),
            name: "default".into(),
            dir_name: "default".into(),
            created_at: Utc::now(),
        };
        ProjectRecord {
            id: ProjectId::from("proj_abc123"),
            name: "p1".into(),
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

    #[test]
    fn container_name_embeds_project_id() {
        assert_eq!(sample().container_name(), "oubliette-proj_abc123");
    }

    #[test]
    fn workspace_lookup() {
        let record = sample();
        let default = record.workspace(&record.default_workspace_id);
        assert!(default.is_some());
        assert!(record.workspace(&WorkspaceId::new()).is_none());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = sample();
        let json = serde_json::to_string_pretty(&record).unwrap();
        let back: ProjectRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
