//! Settings: compiled defaults, deep-merged JSON file, env overrides.
//!
//! Loading flow:
//! 1. Start with [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `OUBLIETTE_*` environment overrides (highest priority)
//!
//! Merge rules: objects merge recursively, arrays and primitives are
//! replaced, nulls in the source are skipped. Invalid env values are
//! silently ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use oubliette_core::config::{AgentConfig, ProjectLimits};

use crate::errors::McpError;

/// Server section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address for the MCP endpoint.
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7227".to_owned(),
        }
    }
}

/// Defaults applied when a project is created without explicit values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DefaultsSettings {
    /// Limit defaults.
    #[serde(default)]
    pub limits: ProjectLimits,
    /// Agent config defaults.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Container section defaults.
    #[serde(default)]
    pub container: ContainerDefaults,
}

/// Default container type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerDefaults {
    /// Logical container-type name resolved through [`Settings::containers`].
    #[serde(rename = "type")]
    pub container_type: String,
}

impl Default for ContainerDefaults {
    fn default() -> Self {
        Self {
            container_type: "base".to_owned(),
        }
    }
}

/// Named credential sets. Values never leave the server; tools see names
/// only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Provider credential sets by name.
    #[serde(default)]
    pub providers: HashMap<String, Value>,
    /// GitHub credential set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<Value>,
}

/// The whole settings tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Server section.
    #[serde(default)]
    pub server: ServerSettings,
    /// Project-creation defaults.
    #[serde(default)]
    pub defaults: DefaultsSettings,
    /// Logical container-type name to image reference.
    #[serde(default)]
    pub containers: HashMap<String, String>,
    /// Credential sets.
    #[serde(default)]
    pub credentials: CredentialSettings,
    /// Projects base directory.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    /// Relay sockets base directory.
    #[serde(default = "default_sockets_dir")]
    pub sockets_dir: PathBuf,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Model identifiers offered by the catalogue tool.
    #[serde(default = "default_models")]
    pub model_options: Vec<String>,
}

fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
    PathBuf::from(home).join(".oubliette")
}

fn default_projects_dir() -> PathBuf {
    data_dir().join("projects")
}

fn default_sockets_dir() -> PathBuf {
    data_dir().join("sockets")
}

fn default_db_path() -> PathBuf {
    data_dir().join("oubliette.db")
}

fn default_models() -> Vec<String> {
    vec!["gpt-5-codex".to_owned(), "claude-sonnet-4-5".to_owned()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            defaults: DefaultsSettings::default(),
            containers: HashMap::from([(
                "base".to_owned(),
                "ghcr.io/oubliette/base:latest".to_owned(),
            )]),
            credentials: CredentialSettings::default(),
            projects_dir: default_projects_dir(),
            sockets_dir: default_sockets_dir(),
            db_path: default_db_path(),
            model_options: default_models(),
        }
    }
}

impl Settings {
    /// Default settings file path (`~/.oubliette/config.json`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Load from a file with env overrides; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| McpError::new(oubliette_core::ErrorKind::Internal, e.to_string()))?;

        let merged = if path.exists() {
            debug!(path = %path.display(), "loading settings");
            let content = std::fs::read_to_string(path)
                .map_err(|e| McpError::new(oubliette_core::ErrorKind::Internal, e.to_string()))?;
            let user: Value = serde_json::from_str(&content)
                .map_err(|e| McpError::invalid(format!("settings file does not parse: {e}")))?;
            deep_merge(defaults, user)
        } else {
            defaults
        };

        let mut settings: Self = serde_json::from_value(merged)
            .map_err(|e| McpError::invalid(format!("settings shape invalid: {e}")))?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env("OUBLIETTE_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = read_env("OUBLIETTE_PROJECTS_DIR") {
            self.projects_dir = PathBuf::from(v);
        }
        if let Some(v) = read_env("OUBLIETTE_SOCKETS_DIR") {
            self.sockets_dir = PathBuf::from(v);
        }
        if let Some(v) = read_env("OUBLIETTE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = read_env("OUBLIETTE_DEFAULT_MODEL") {
            self.defaults.agent.model = v;
        }
        if let Some(v) = read_env_u32("OUBLIETTE_MAX_RECURSION_DEPTH", 1, 64) {
            self.defaults.limits.max_recursion_depth = v;
        }
        if let Some(v) = read_env_u32("OUBLIETTE_MAX_AGENTS_PER_SESSION", 1, 1024) {
            self.defaults.limits.max_agents_per_session = v;
        }
    }

    /// An annotated example configuration for `config example`.
    #[must_use]
    pub fn example_json() -> String {
        serde_json::to_string_pretty(&serde_json::json!({
            "server": { "address": "127.0.0.1:7227" },
            "defaults": {
                "limits": { "max_recursion_depth": 3, "max_agents_per_session": 5 },
                "agent": { "model": "gpt-5-codex", "autonomy": "medium", "reasoning": "medium" },
                "container": { "type": "base" }
            },
            "containers": { "base": "ghcr.io/oubliette/base:latest" },
            "credentials": { "providers": {}, "github": null }
        }))
        .unwrap_or_default()
    }
}

/// Recursive deep merge; source wins, nulls in source are skipped.
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    read_env(name)?
        .parse::<u32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
