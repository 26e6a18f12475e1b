//! Canonical agent configuration and per-project limits.
//!
//! Projects are created with these values resolved from server defaults and
//! the creator's overrides; everything downstream (sessions, scheduler,
//! relay) reads the resolved copy from the project record.

use serde::{Deserialize, Serialize};

/// Autonomy level, mapped to per-runtime permission presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    /// Every action requires approval.
    Off,
    /// Reads allowed, writes require approval.
    Low,
    /// Writes inside the workspace allowed.
    #[default]
    Medium,
    /// Everything allowed.
    High,
}

/// Reasoning effort forwarded to the runtime per message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reasoning {
    /// No extended reasoning.
    Off,
    /// Brief reasoning.
    Low,
    /// Moderate reasoning.
    #[default]
    Medium,
    /// Maximum reasoning.
    High,
}

/// Per-project resource caps.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectLimits {
    /// Maximum spawn depth; root sessions are depth 0.
    pub max_recursion_depth: u32,
    /// Maximum live sessions in one session tree.
    pub max_agents_per_session: u32,
    /// Soft spend cap in USD, when the runtime reports cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
}

impl Default for ProjectLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: crate::constants::DEFAULT_MAX_RECURSION_DEPTH,
            max_agents_per_session: crate::constants::DEFAULT_MAX_AGENTS_PER_SESSION,
            max_cost_usd: None,
        }
    }
}

/// Canonical agent configuration owned by a project.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier forwarded to the runtime.
    pub model: String,
    /// Autonomy preset.
    #[serde(default)]
    pub autonomy: Autonomy,
    /// Reasoning effort.
    #[serde(default)]
    pub reasoning: Reasoning,
    /// Names of MCP servers to inject into the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
    /// Tool names disabled for this project's agents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_default_to_constants() {
        let limits = ProjectLimits::default();
        assert_eq!(limits.max_recursion_depth, crate::constants::DEFAULT_MAX_RECURSION_DEPTH);
        assert_eq!(
            limits.max_agents_per_session,
            crate::constants::DEFAULT_MAX_AGENTS_PER_SESSION
        );
        assert!(limits.max_cost_usd.is_none());
    }

    #[test]
    fn autonomy_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Autonomy::High).unwrap(), "\"high\"");
        assert_eq!(serde_json::from_str::<Autonomy>("\"off\"").unwrap(), Autonomy::Off);
    }

    #[test]
    fn agent_config_defaults_fill_in() {
        let cfg: AgentConfig = serde_json::from_str(r#"{"model": "gpt-5-codex"}"#).unwrap();
        assert_eq!(cfg.autonomy, Autonomy::Medium);
        assert_eq!(cfg.reasoning, Reasoning::Medium);
        assert!(cfg.mcp_servers.is_empty());
        assert!(cfg.disabled_tools.is_empty());
    }

    #[test]
    fn empty_vectors_omitted_on_wire() {
        let cfg = AgentConfig {
            model: "m".into(),
            ..AgentConfig::default()
        };
        let v = serde_json::to_value(&cfg).unwrap();
        assert!(v.get("mcp_servers").is_none());
        assert!(v.get("disabled_tools").is_none());
    }
}
