//! Token scopes and the ACL decision function.
//!
//! The scope grammar is `admin | admin:ro | project:<id> | project:<id>:ro`.
//! One function, [`Scope::allows`], is the authority at every enforcement
//! point: MCP `tools/list` filtering, `tools/call` gating, the socket relay,
//! and the scheduler's fire-time check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::ProjectId;

/// What kind of resource a tool operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTarget {
    /// Server-wide; no project argument.
    Global,
    /// Operates on one project, named by a `project_id` argument.
    Project,
}

/// Access level a tool requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// Read-only.
    Read,
    /// Mutating.
    Write,
    /// Administrative (token management, project deletion).
    Admin,
}

/// A token's authorization envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Full access to everything.
    Admin,
    /// Read-only access to everything.
    AdminReadOnly,
    /// Full access to one project, read access to global catalogues.
    Project(ProjectId),
    /// Read-only access to one project.
    ProjectReadOnly(ProjectId),
}

/// Error parsing a scope string.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid scope '{0}'")]
pub struct ScopeParseError(pub String);

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => return Ok(Self::Admin),
            "admin:ro" => return Ok(Self::AdminReadOnly),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("project:") {
            if let Some(id) = rest.strip_suffix(":ro") {
                if !id.is_empty() && !id.contains(':') {
                    return Ok(Self::ProjectReadOnly(ProjectId::from(id)));
                }
            } else if !rest.is_empty() && !rest.contains(':') {
                return Ok(Self::Project(ProjectId::from(rest)));
            }
        }
        Err(ScopeParseError(s.to_owned()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::AdminReadOnly => f.write_str("admin:ro"),
            Self::Project(id) => write!(f, "project:{id}"),
            Self::ProjectReadOnly(id) => write!(f, "project:{id}:ro"),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Scope> for String {
    fn from(s: Scope) -> Self {
        s.to_string()
    }
}

impl Scope {
    /// The ACL decision: may a holder of this scope call a tool with the
    /// given target and access level, against `project` (taken from the
    /// tool's arguments)?
    ///
    /// Project-targeted tools with no project argument are always denied.
    #[must_use]
    pub fn allows(&self, target: ToolTarget, access: ToolAccess, project: Option<&ProjectId>) -> bool {
        match target {
            ToolTarget::Global => match access {
                ToolAccess::Read => true,
                ToolAccess::Write | ToolAccess::Admin => matches!(self, Self::Admin),
            },
            ToolTarget::Project => {
                let Some(project) = project else {
                    return false;
                };
                match self {
                    Self::Admin => true,
                    Self::AdminReadOnly => access == ToolAccess::Read,
                    Self::Project(own) => {
                        own == project && matches!(access, ToolAccess::Read | ToolAccess::Write)
                    }
                    Self::ProjectReadOnly(own) => own == project && access == ToolAccess::Read,
                }
            }
        }
    }

    /// Whether this scope can act on the given project at all (read or
    /// better). Used for list filtering.
    #[must_use]
    pub fn can_see_project(&self, project: &ProjectId) -> bool {
        self.allows(ToolTarget::Project, ToolAccess::Read, Some(project))
    }

    /// Whether this scope carries any write capability.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::AdminReadOnly | Self::ProjectReadOnly(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn proj(id: &str) -> ProjectId {
        ProjectId::from(id)
    }

    #[test]
    fn parse_all_forms() {
        assert_eq!("admin".parse::<Scope>().unwrap(), Scope::Admin);
        assert_eq!("admin:ro".parse::<Scope>().unwrap(), Scope::AdminReadOnly);
        assert_eq!(
            "project:proj_a1".parse::<Scope>().unwrap(),
            Scope::Project(proj("proj_a1"))
        );
        assert_eq!(
            "project:proj_a1:ro".parse::<Scope>().unwrap(),
            Scope::ProjectReadOnly(proj("proj_a1"))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "root", "project:", "project::ro", "admin:rw", "project:a:b:ro"] {
            assert!(bad.parse::<Scope>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn display_roundtrip() {
        for s in ["admin", "admin:ro", "project:proj_x", "project:proj_x:ro"] {
            let scope: Scope = s.parse().unwrap();
            assert_eq!(scope.to_string(), s);
        }
    }

    #[test]
    fn serde_uses_string_form() {
        let scope: Scope = "project:proj_x:ro".parse().unwrap();
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, "\"project:proj_x:ro\"");
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }

    // The full decision table from the access matrix.

    #[test]
    fn admin_allows_everything() {
        let s = Scope::Admin;
        assert!(s.allows(ToolTarget::Global, ToolAccess::Admin, None));
        assert!(s.allows(ToolTarget::Global, ToolAccess::Write, None));
        assert!(s.allows(ToolTarget::Global, ToolAccess::Read, None));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Write, Some(&proj("proj_p"))));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_p"))));
    }

    #[test]
    fn admin_ro_reads_only() {
        let s = Scope::AdminReadOnly;
        assert!(!s.allows(ToolTarget::Global, ToolAccess::Admin, None));
        assert!(!s.allows(ToolTarget::Global, ToolAccess::Write, None));
        assert!(s.allows(ToolTarget::Global, ToolAccess::Read, None));
        assert!(!s.allows(ToolTarget::Project, ToolAccess::Write, Some(&proj("proj_p"))));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_p"))));
    }

    #[test]
    fn project_scope_bound_to_own_project() {
        let s = Scope::Project(proj("proj_x"));
        assert!(!s.allows(ToolTarget::Global, ToolAccess::Admin, None));
        assert!(!s.allows(ToolTarget::Global, ToolAccess::Write, None));
        assert!(s.allows(ToolTarget::Global, ToolAccess::Read, None));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Write, Some(&proj("proj_x"))));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_x"))));
        assert!(!s.allows(ToolTarget::Project, ToolAccess::Write, Some(&proj("proj_y"))));
        assert!(!s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_y"))));
    }

    #[test]
    fn project_ro_scope_reads_own_project_only() {
        let s = Scope::ProjectReadOnly(proj("proj_x"));
        assert!(s.allows(ToolTarget::Global, ToolAccess::Read, None));
        assert!(!s.allows(ToolTarget::Project, ToolAccess::Write, Some(&proj("proj_x"))));
        assert!(s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_x"))));
        assert!(!s.allows(ToolTarget::Project, ToolAccess::Read, Some(&proj("proj_y"))));
    }

    #[test]
    fn project_tool_without_project_arg_denied() {
        for s in [
            Scope::Admin,
            Scope::AdminReadOnly,
            Scope::Project(proj("proj_x")),
            Scope::ProjectReadOnly(proj("proj_x")),
        ] {
            assert!(!s.allows(ToolTarget::Project, ToolAccess::Read, None));
        }
    }

    #[test]
    fn project_admin_access_requires_admin_scope() {
        // admin-access project tools (e.g. project_delete) are admin-only
        assert!(Scope::Admin.allows(ToolTarget::Project, ToolAccess::Admin, Some(&proj("proj_x"))));
        assert!(!Scope::Project(proj("proj_x")).allows(
            ToolTarget::Project,
            ToolAccess::Admin,
            Some(&proj("proj_x"))
        ));
        assert!(!Scope::AdminReadOnly.allows(
            ToolTarget::Project,
            ToolAccess::Admin,
            Some(&proj("proj_x"))
        ));
    }

    #[test]
    fn read_only_flag() {
        assert!(!Scope::Admin.is_read_only());
        assert!(Scope::AdminReadOnly.is_read_only());
        assert!(!Scope::Project(proj("proj_x")).is_read_only());
        assert!(Scope::ProjectReadOnly(proj("proj_x")).is_read_only());
    }
}
