//! Execution history table access. Append-only.

use rusqlite::{params, Connection};

use oubliette_core::{ExecutionId, ProjectId, ScheduleId, SessionId, WorkspaceId};

use super::{parse_ts, to_sql};
use crate::errors::{Result, StoreError};
use crate::types::{ExecutionRecord, ExecutionStatus};

/// Repository for the `executions` table.
pub struct ExecutionRepository;

impl ExecutionRepository {
    /// Append an execution record.
    #[allow(clippy::cast_possible_wrap)]
    pub fn insert(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO executions (id, schedule_id, target_project_id, target_workspace_id,
             status, session_id, error, duration_ms, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.as_str(),
                record.schedule_id.as_str(),
                record.target_project_id.as_str(),
                record.target_workspace_id.as_ref().map(WorkspaceId::as_str),
                record.status.as_sql(),
                record.session_id.as_ref().map(SessionId::as_str),
                record.error,
                record.duration_ms.map(|d| d as i64),
                to_sql(record.started_at),
            ],
        )?;
        Ok(())
    }

    /// Recent executions of one schedule, newest first.
    pub fn list_for_schedule(
        conn: &Connection,
        schedule_id: &ScheduleId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, target_project_id, target_workspace_id,
             status, session_id, error, duration_ms, started_at
             FROM executions WHERE schedule_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![schedule_id.as_str(), limit], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

type RowResult = std::result::Result<Result<ExecutionRecord>, rusqlite::Error>;

#[allow(clippy::cast_sign_loss)]
fn row_to_record(row: &rusqlite::Row<'_>) -> RowResult {
    let id: String = row.get(0)?;
    let schedule_id: String = row.get(1)?;
    let target_project_id: String = row.get(2)?;
    let target_workspace_id: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let session_id: Option<String> = row.get(5)?;
    let error: Option<String> = row.get(6)?;
    let duration_ms: Option<i64> = row.get(7)?;
    let started_at: String = row.get(8)?;

    Ok((|| {
        let decoded = ExecutionStatus::from_sql(&status).ok_or_else(|| StoreError::Corrupt {
            entity: "execution",
            id: id.clone(),
            message: format!("unknown status '{status}'"),
        })?;
        Ok(ExecutionRecord {
            schedule_id: ScheduleId::from(schedule_id),
            target_project_id: ProjectId::from(target_project_id),
            target_workspace_id: target_workspace_id.map(WorkspaceId::from),
            status: decoded,
            session_id: session_id.map(SessionId::from),
            error,
            duration_ms: duration_ms.map(|d| d as u64),
            started_at: parse_ts("execution", &id, &started_at)?,
            id: ExecutionId::from(id),
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
    use crate::repositories::ScheduleRepository;
    use crate::types::{NewSchedule, OverlapPolicy, SessionPolicy};
    use chrono::Utc;
    use oubliette_core::TokenId;

    fn seed_schedule(conn: &Connection) -> ScheduleId {
        ScheduleRepository::insert(
            conn,
            &NewSchedule {
                name: "s".to_owned(),
                cron: "* * * * *".to_owned(),
                prompt: "p".to_owned(),
                enabled: true,
                overlap_policy: OverlapPolicy::Skip,
                session_policy: SessionPolicy::New,
                creator_token_id: TokenId::new(),
                creator_scope: "admin".to_owned(),
                next_run_at: None,
                targets: vec![(ProjectId::from("proj_a"), None)],
            },
        )
        .unwrap()
        .id
    }

    fn make_execution(schedule_id: &ScheduleId, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            id: ExecutionId::new(),
            schedule_id: schedule_id.clone(),
            target_project_id: ProjectId::from("proj_a"),
            target_workspace_id: None,
            status,
            session_id: None,
            error: None,
            duration_ms: Some(120),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_list() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let sid = seed_schedule(&conn);

        ExecutionRepository::insert(&conn, &make_execution(&sid, ExecutionStatus::Success))
            .unwrap();
        ExecutionRepository::insert(
            &conn,
            &ExecutionRecord {
                error: Some("overlap".to_owned()),
                ..make_execution(&sid, ExecutionStatus::Skipped)
            },
        )
        .unwrap();

        let listed = ExecutionRepository::list_for_schedule(&conn, &sid, 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|e| e.status == ExecutionStatus::Skipped));
    }

    #[test]
    fn list_respects_limit() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let sid = seed_schedule(&conn);
        for _ in 0..5 {
            ExecutionRepository::insert(&conn, &make_execution(&sid, ExecutionStatus::Success))
                .unwrap();
        }
        let listed = ExecutionRepository::list_for_schedule(&conn, &sid, 3).unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn schedule_delete_cascades_executions() {
        let pool = open_test_pool();
        let conn = pool.get().unwrap();
        let sid = seed_schedule(&conn);
        ExecutionRepository::insert(&conn, &make_execution(&sid, ExecutionStatus::Failed))
            .unwrap();

        assert!(ScheduleRepository::delete(&conn, &sid).unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM executions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
