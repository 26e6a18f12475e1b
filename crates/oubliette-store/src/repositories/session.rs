//! Session table access.

use rusqlite::{params, Connection, OptionalExtension};

use oubliette_core::{ProjectId, SessionId, TokenId, WorkspaceId};

use super::{now_sql, parse_ts};
use crate::errors::{Result, StoreError};
use crate::types::{NewSession, SessionRecord, SessionStatus};

/// Filter for listing sessions.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Restrict to one project.
    pub project_id: Option<ProjectId>,
    /// Restrict to live sessions (`active` or `cancelling`).
    pub live_only: bool,
    /// Maximum rows returned.
    pub limit: Option<u32>,
}

/// Repository for the `sessions` table.
pub struct SessionRepository;

impl SessionRepository {
    /// Insert a new session row with status `active`.
    pub fn insert(conn: &Connection, new: &NewSession) -> Result<SessionRecord> {
        let now = now_sql();
        let _ = conn.execute(
            "INSERT INTO sessions (id, project_id, workspace_id, parent_session_id, depth,
             creator_token_id, creator_scope, runtime_session_id, status,
             created_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 'active', ?8, ?8)",
            params![
                new.id.as_str(),
                new.project_id.as_str(),
                new.workspace_id.as_str(),
                new.parent_session_id.as_ref().map(SessionId::as_str),
                new.depth,
                new.creator_token_id.as_str(),
                new.creator_scope,
                now,
            ],
        )?;
        Self::get(conn, &new.id)?.ok_or_else(|| StoreError::not_found("session", new.id.as_str()))
    }

    /// Fetch a session by ID.
    pub fn get(conn: &Connection, id: &SessionId) -> Result<Option<SessionRecord>> {
        conn.query_row(
            &format!("{SELECT_COLS} FROM sessions WHERE id = ?1"),
            params![id.as_str()],
            row_to_record,
        )
        .optional()?
        .transpose()
    }

    /// List sessions matching a filter, newest first.
    pub fn list(conn: &Connection, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let mut sql = format!("{SELECT_COLS} FROM sessions WHERE status != 'gone'");
        let mut bind: Vec<String> = Vec::new();
        if let Some(project) = &filter.project_id {
            sql.push_str(" AND project_id = ?1");
            bind.push(project.as_str().to_owned());
        }
        if filter.live_only {
            sql.push_str(" AND status IN ('active', 'cancelling')");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// All live sessions of one project, for fan-out accounting.
    pub fn live_in_project(conn: &Connection, project: &ProjectId) -> Result<Vec<SessionRecord>> {
        Self::list(
            conn,
            &SessionFilter {
                project_id: Some(project.clone()),
                live_only: true,
                limit: None,
            },
        )
    }

    /// Update lifecycle status.
    pub fn set_status(conn: &Connection, id: &SessionId, status: SessionStatus) -> Result<()> {
        let n = conn.execute(
            "UPDATE sessions SET status = ?1, last_activity_at = ?2 WHERE id = ?3",
            params![status.as_sql(), now_sql(), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("session", id.as_str()));
        }
        Ok(())
    }

    /// Record the backend-assigned session ID once known.
    pub fn set_runtime_session_id(
        conn: &Connection,
        id: &SessionId,
        runtime_session_id: &str,
    ) -> Result<()> {
        let n = conn.execute(
            "UPDATE sessions SET runtime_session_id = ?1 WHERE id = ?2",
            params![runtime_session_id, id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("session", id.as_str()));
        }
        Ok(())
    }

    /// Bump `last_activity_at`.
    pub fn touch(conn: &Connection, id: &SessionId) -> Result<()> {
        let _ = conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
            params![now_sql(), id.as_str()],
        )?;
        Ok(())
    }

    /// Mark every session of a project `gone`. Used by project deletion.
    pub fn mark_project_gone(conn: &Connection, project: &ProjectId) -> Result<u32> {
        let n = conn.execute(
            "UPDATE sessions SET status = 'gone', last_activity_at = ?1 WHERE project_id = ?2",
            params![now_sql(), project.as_str()],
        )?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(n as u32)
    }
}

const SELECT_COLS: &str = "SELECT id, project_id, workspace_id, parent_session_id, depth,
    creator_token_id, creator_scope, runtime_session_id, status, created_at, last_activity_at";

type RowResult = std::result::Result<Result<SessionRecord>, rusqlite::Error>;

#[allow(clippy::cast_sign_loss)]
fn row_to_record(row: &rusqlite::Row<'_>) -> RowResult {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let workspace_id: String = row.get(2)?;
    let parent: Option<String> = row.get(3)?;
    let depth: i64 = row.get(4)?;
    let creator_token_id: String = row.get(5)?;
    let creator_scope: String = row.get(6)?;
    let runtime_session_id: Option<String> = row.get(7)?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let last_activity_at: String = row.get(10)?;

    Ok((|| {
        let decoded_status = SessionStatus::from_sql(&status).ok_or_else(|| StoreError::Corrupt {
            entity: "session",
            id: id.clone(),
            message: format!("unknown status '{status}'"),
        })?;
        Ok(SessionRecord {
            project_id: ProjectId::from(project_id),
            workspace_id: WorkspaceId::from(workspace_id),
            parent_session_id: parent.map(SessionId::from),
            depth: depth as u32,
            creator_token_id: TokenId::from(creator_token_id),
            creator_scope,
            runtime_session_id,
            status: decoded_status,
            created_at: parse_ts("session", &id, &created_at)?,
            last_activity_at: parse_ts("session", &id, &last_activity_at)?,
            id: SessionId::from(id),
        })
    })())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_test_pool;

    fn make_new(project: &str, parent: Option<&SessionId>, depth: u32) -> NewSession {
        NewSession {
            id: SessionId::new(),
            project_id: ProjectId::from(project),
            workspace_id: WorkspaceId::new(),
            parent_session_id: parent.cloned(),
            depth,
            creator_token_id: TokenId::new(),
            creator_scope: "admin".to_owned(),
        }
    }

    #[test]
    fn insert_starts_active() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let record = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.depth, 0);
        assert!(record.runtime_session_id.is_none());
    }

    #[test]
    fn child_references_parent() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let root = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        let child =
            SessionRepository::insert(&conn, &make_new("proj_a", Some(&root.id), 1)).unwrap();
        assert_eq!(child.parent_session_id.as_ref(), Some(&root.id));
        assert_eq!(child.depth, 1);
    }

    #[test]
    fn status_transitions_persist() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let record = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();

        SessionRepository::set_status(&conn, &record.id, SessionStatus::Detached).unwrap();
        let loaded = SessionRepository::get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Detached);
    }

    #[test]
    fn set_status_missing_session_errors() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let err = SessionRepository::set_status(&conn, &SessionId::new(), SessionStatus::Gone)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn runtime_session_id_persists() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let record = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        SessionRepository::set_runtime_session_id(&conn, &record.id, "backend-42").unwrap();
        let loaded = SessionRepository::get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(loaded.runtime_session_id.as_deref(), Some("backend-42"));
    }

    #[test]
    fn live_in_project_excludes_detached() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let a = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        let _b = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        let _other = SessionRepository::insert(&conn, &make_new("proj_b", None, 0)).unwrap();
        SessionRepository::set_status(&conn, &a.id, SessionStatus::Detached).unwrap();

        let live = SessionRepository::live_in_project(&conn, &ProjectId::from("proj_a")).unwrap();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn list_filters_by_project_and_limit() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        for _ in 0..3 {
            let _ = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        }
        let listed = SessionRepository::list(
            &conn,
            &SessionFilter {
                project_id: Some(ProjectId::from("proj_a")),
                live_only: false,
                limit: Some(2),
            },
        )
        .unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn mark_project_gone_hides_sessions() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let record = SessionRepository::insert(&conn, &make_new("proj_a", None, 0)).unwrap();
        let n = SessionRepository::mark_project_gone(&conn, &ProjectId::from("proj_a")).unwrap();
        assert_eq!(n, 1);
        let listed = SessionRepository::list(&conn, &SessionFilter::default()).unwrap();
        assert!(listed.is_empty());
        // Row still exists for audit, status is gone
        let raw = SessionRepository::get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(raw.status, SessionStatus::Gone);
    }
}
