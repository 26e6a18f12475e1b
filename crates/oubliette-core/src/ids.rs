//! Branded ID newtypes for type safety.
//!
//! Every entity in the system has a distinct ID type implemented as a newtype
//! wrapper around `String`, so a session ID can never be passed where a
//! project ID is expected. Prefixed IDs (`proj_`, `sess_`, ...) carry random
//! hex entropy; workspace IDs are plain UUID v4.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate `len` random bytes rendered as lowercase hex.
fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(len * 2);
    for b in &bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, gen = $gen:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self($gen)
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a project (tenant boundary). Format: `proj_` + 12 hex.
    ProjectId, gen = format!("proj_{}", random_hex(6))
}

branded_id! {
    /// Unique identifier for a session. Format: `sess_` + 12 hex.
    SessionId, gen = format!("sess_{}", random_hex(6))
}

branded_id! {
    /// Unique identifier for a workspace within a project. Plain UUID v4.
    WorkspaceId, gen = Uuid::new_v4().to_string()
}

branded_id! {
    /// Unique identifier for a schedule. Format: `sched_` + 12 hex.
    ScheduleId, gen = format!("sched_{}", random_hex(6))
}

branded_id! {
    /// Unique identifier for one execution of one schedule target. Format: `exec_` + 12 hex.
    ExecutionId, gen = format!("exec_{}", random_hex(6))
}

branded_id! {
    /// Bearer token. The ID *is* the secret: `oub_` + 64 hex (32 random bytes).
    TokenId, gen = format!("oub_{}", random_hex(32))
}

impl TokenId {
    /// Whether a candidate bearer string has the token prefix.
    #[must_use]
    pub fn has_prefix(candidate: &str) -> bool {
        candidate.starts_with("oub_")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_has_prefix_and_length() {
        let id = ProjectId::new();
        assert!(id.as_str().starts_with("proj_"));
        assert_eq!(id.as_str().len(), "proj_".len() + 12);
    }

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"));
    }

    #[test]
    fn workspace_id_is_uuid() {
        let id = WorkspaceId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn token_id_is_oub_plus_64_hex() {
        let id = TokenId::new();
        assert!(id.as_str().starts_with("oub_"));
        let hex = &id.as_str()["oub_".len()..];
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_prefix_check() {
        assert!(TokenId::has_prefix("oub_abc"));
        assert!(!TokenId::has_prefix("sess_abc"));
        assert!(!TokenId::has_prefix(""));
    }

    #[test]
    fn ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_string_roundtrip() {
        let id = ProjectId::from_string("proj_custom".to_owned());
        assert_eq!(id.as_str(), "proj_custom");
        let s: String = id.into();
        assert_eq!(s, "proj_custom");
    }

    #[test]
    fn display_matches_inner() {
        let id = ScheduleId::from("sched_abc123");
        assert_eq!(format!("{id}"), "sched_abc123");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from("sess_0011223344");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess_0011223344\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = ExecutionId::from("exec_same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id);
        assert_eq!(set.len(), 1);
    }
}
