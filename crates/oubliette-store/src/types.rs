//! Persisted records and their storage enums.
//!
//! Enum values are stored as lowercase TEXT via `as_sql`/`from_sql`; decode
//! failures surface as [`crate::StoreError::Corrupt`] rather than panicking.

use chrono::{DateTime, Utc};
use oubliette_core::{ExecutionId, ProjectId, ScheduleId, SessionId, TokenId, WorkspaceId};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// A persisted bearer token. The row ID is the bearer secret itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer string (`oub_` + 64 hex).
    pub id: TokenId,
    /// Operator-assigned label.
    pub name: String,
    /// Scope string (`admin`, `project:<id>`, ...).
    pub scope: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful validation, updated opportunistically.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Hard expiry; `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a persisted session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A live executor is attached.
    Active,
    /// An interrupt was issued and is in flight.
    Cancelling,
    /// Persisted, resumable, no executor attached.
    Detached,
    /// Deleted; terminal.
    Gone,
}

impl SessionStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelling => "cancelling",
            Self::Detached => "detached",
            Self::Gone => "gone",
        }
    }

    /// Decode from storage.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cancelling" => Some(Self::Cancelling),
            "detached" => Some(Self::Detached),
            "gone" => Some(Self::Gone),
            _ => None,
        }
    }
}

/// A persisted session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session ID.
    pub id: SessionId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Working directory within the project.
    pub workspace_id: WorkspaceId,
    /// Spawning session, when this is a nested spawn.
    pub parent_session_id: Option<SessionId>,
    /// Distance from the root session; 0 at root.
    pub depth: u32,
    /// Token that created the session.
    pub creator_token_id: TokenId,
    /// Scope string of the creator at spawn time.
    pub creator_scope: String,
    /// Backend-assigned session ID, opaque to us; required for resume.
    pub runtime_session_id: Option<String>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last event or message time.
    pub last_activity_at: DateTime<Utc>,
}

/// Parameters for inserting a session row.
#[derive(Clone, Debug)]
pub struct NewSession {
    /// Session ID (caller-generated).
    pub id: SessionId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Workspace.
    pub workspace_id: WorkspaceId,
    /// Parent session for nested spawns.
    pub parent_session_id: Option<SessionId>,
    /// Spawn depth.
    pub depth: u32,
    /// Creator token.
    pub creator_token_id: TokenId,
    /// Creator scope string.
    pub creator_scope: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedules
// ─────────────────────────────────────────────────────────────────────────────

/// What to do when a firing overlaps an in-flight one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Record a skipped execution and do not fire.
    #[default]
    Skip,
    /// Reserved. Currently behaves exactly like `skip`.
    Queue,
    /// Always fire.
    Parallel,
}

impl OverlapPolicy {
    /// Storage representation.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Queue => "queue",
            Self::Parallel => "parallel",
        }
    }

    /// Decode from storage.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "skip" => Some(Self::Skip),
            "queue" => Some(Self::Queue),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

/// Whether a firing reuses an existing session or spawns fresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Reuse the schedule's active session for the target when one exists.
    Resume,
    /// Always spawn a new session.
    #[default]
    New,
}

impl SessionPolicy {
    /// Storage representation.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::New => "new",
        }
    }

    /// Decode from storage.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "resume" => Some(Self::Resume),
            "new" => Some(Self::New),
            _ => None,
        }
    }
}

/// One (project, workspace?) a schedule fires into.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTarget {
    /// Row ID.
    pub id: String,
    /// Owning schedule.
    pub schedule_id: ScheduleId,
    /// Target project.
    pub project_id: ProjectId,
    /// Target workspace; `None` means the project's default workspace.
    pub workspace_id: Option<WorkspaceId>,
}

/// A persisted schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Schedule ID.
    pub id: ScheduleId,
    /// Operator-assigned name.
    pub name: String,
    /// Standard 5-field cron expression.
    pub cron: String,
    /// Prompt re-driven at each firing.
    pub prompt: String,
    /// Disabled schedules are never picked up by the tick loop.
    pub enabled: bool,
    /// Overlap policy.
    pub overlap_policy: OverlapPolicy,
    /// Session policy.
    pub session_policy: SessionPolicy,
    /// Token that created the schedule.
    pub creator_token_id: TokenId,
    /// Creator scope at creation time; re-checked at every firing.
    pub creator_scope: String,
    /// Last firing instant; advanced only by the scheduler.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next due instant; advanced only by the scheduler.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Targets, loaded with the schedule.
    pub targets: Vec<ScheduleTarget>,
}

/// Parameters for creating a schedule.
#[derive(Clone, Debug)]
pub struct NewSchedule {
    /// Name.
    pub name: String,
    /// Cron expression (already validated by the scheduler).
    pub cron: String,
    /// Prompt.
    pub prompt: String,
    /// Enabled flag.
    pub enabled: bool,
    /// Overlap policy.
    pub overlap_policy: OverlapPolicy,
    /// Session policy.
    pub session_policy: SessionPolicy,
    /// Creator token.
    pub creator_token_id: TokenId,
    /// Creator scope string.
    pub creator_scope: String,
    /// Initial next-run instant.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Targets: (project, workspace?).
    pub targets: Vec<(ProjectId, Option<WorkspaceId>)>,
}

/// Partial update of a schedule. `None` fields are left unchanged;
/// `targets: Some(..)` replaces the whole target list.
#[derive(Clone, Debug, Default)]
pub struct ScheduleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New cron expression.
    pub cron: Option<String>,
    /// New prompt.
    pub prompt: Option<String>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New overlap policy.
    pub overlap_policy: Option<OverlapPolicy>,
    /// New session policy.
    pub session_policy: Option<SessionPolicy>,
    /// Recomputed next-run instant (set when cron changes).
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    /// Replacement target list.
    pub targets: Option<Vec<(ProjectId, Option<WorkspaceId>)>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Executions
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one attempt to fire one target of one schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The target session was spawned or messaged.
    Success,
    /// The attempt failed; `error` holds the reason.
    Failed,
    /// Suppressed by overlap policy.
    Skipped,
}

impl ExecutionStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Decode from storage.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Append-only record of one firing attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution ID.
    pub id: ExecutionId,
    /// Schedule that fired.
    pub schedule_id: ScheduleId,
    /// Target project.
    pub target_project_id: ProjectId,
    /// Target workspace, when the target named one.
    pub target_workspace_id: Option<WorkspaceId>,
    /// Outcome.
    pub status: ExecutionStatus,
    /// Session the firing drove, when one was reached.
    pub session_id: Option<SessionId>,
    /// Error text for failed/skipped attempts.
    pub error: Option<String>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: Option<u64>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_sql_roundtrip() {
        for s in [
            SessionStatus::Active,
            SessionStatus::Cancelling,
            SessionStatus::Detached,
            SessionStatus::Gone,
        ] {
            assert_eq!(SessionStatus::from_sql(s.as_sql()), Some(s));
        }
        assert_eq!(SessionStatus::from_sql("bogus"), None);
    }

    #[test]
    fn overlap_policy_sql_roundtrip() {
        for p in [OverlapPolicy::Skip, OverlapPolicy::Queue, OverlapPolicy::Parallel] {
            assert_eq!(OverlapPolicy::from_sql(p.as_sql()), Some(p));
        }
    }

    #[test]
    fn session_policy_sql_roundtrip() {
        for p in [SessionPolicy::Resume, SessionPolicy::New] {
            assert_eq!(SessionPolicy::from_sql(p.as_sql()), Some(p));
        }
    }

    #[test]
    fn execution_status_sql_roundtrip() {
        for s in [ExecutionStatus::Success, ExecutionStatus::Failed, ExecutionStatus::Skipped] {
            assert_eq!(ExecutionStatus::from_sql(s.as_sql()), Some(s));
        }
    }

    #[test]
    fn defaults_match_spec() {
        assert_eq!(OverlapPolicy::default(), OverlapPolicy::Skip);
        assert_eq!(SessionPolicy::default(), SessionPolicy::New);
    }
}
