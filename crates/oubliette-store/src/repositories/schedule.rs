//! Schedule and schedule-target table access.
//!
//! Creating or updating a schedule touches two tables; those paths run in an
//! explicit transaction so a failure leaves no half-written schedule.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use oubliette_core::{ProjectId, ScheduleId, TokenId, WorkspaceId};

use super::{now_sql, parse_opt_ts, parse_ts, to_sql};
use crate::errors::{Result, StoreError};
use crate::types::{
    NewSchedule, OverlapPolicy, ScheduleRecord, ScheduleTarget, ScheduleUpdate, SessionPolicy,
};

/// Repository for the `schedules` and `schedule_targets` tables.
pub struct ScheduleRepository;

impl ScheduleRepository {
    /// Create a schedule with its targets, transactionally.
    pub fn insert(conn: &Connection, new: &NewSchedule) -> Result<ScheduleRecord> {
        let id = ScheduleId::new();
        let now = now_sql();
        in_tx(conn, || {
            let _ = conn.execute(
                "INSERT INTO schedules (id, name, cron, prompt, enabled, overlap_policy,
                 session_policy, creator_token_id, creator_scope, last_run_at, next_run_at,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11, ?11)",
                params![
                    id.as_str(),
                    new.name,
                    new.cron,
                    new.prompt,
                    new.enabled,
                    new.overlap_policy.as_sql(),
                    new.session_policy.as_sql(),
                    new.creator_token_id.as_str(),
                    new.creator_scope,
                    new.next_run_at.map(to_sql),
                    now,
                ],
            )?;
            insert_targets(conn, &id, &new.targets)?;
            Ok(())
        })?;
        Self::get(conn, &id)?.ok_or_else(|| StoreError::not_found("schedule", id.as_str()))
    }

    /// Fetch a schedule with its targets.
    pub fn get(conn: &Connection, id: &ScheduleId) -> Result<Option<ScheduleRecord>> {
        let row = conn
            .query_row(
                &format!("{SELECT_COLS} FROM schedules WHERE id = ?1"),
                params![id.as_str()],
                row_to_record,
            )
            .optional()?
            .transpose()?;
        let Some(mut record) = row else {
            return Ok(None);
        };
        record.targets = Self::targets(conn, id)?;
        Ok(Some(record))
    }

    /// List all schedules with targets, by creation time.
    pub fn list(conn: &Connection) -> Result<Vec<ScheduleRecord>> {
        let mut stmt =
            conn.prepare(&format!("{SELECT_COLS} FROM schedules ORDER BY created_at ASC"))?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            let mut record = row??;
            record.targets = Self::targets(conn, &record.id)?;
            out.push(record);
        }
        Ok(out)
    }

    /// Schedules due at `now`: enabled with `next_run_at <= now`, in
    /// ascending due order.
    pub fn due(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLS} FROM schedules
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC"
        ))?;
        let rows = stmt.query_map(params![to_sql(now)], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            let mut record = row??;
            record.targets = Self::targets(conn, &record.id)?;
            out.push(record);
        }
        Ok(out)
    }

    /// Apply a partial update; replaces targets when the update carries them.
    pub fn update(
        conn: &Connection,
        id: &ScheduleId,
        update: &ScheduleUpdate,
    ) -> Result<ScheduleRecord> {
        in_tx(conn, || {
            if let Some(name) = &update.name {
                set_col(conn, id, "name", name)?;
            }
            if let Some(cron) = &update.cron {
                set_col(conn, id, "cron", cron)?;
            }
            if let Some(prompt) = &update.prompt {
                set_col(conn, id, "prompt", prompt)?;
            }
            if let Some(enabled) = update.enabled {
                let _ = conn.execute(
                    "UPDATE schedules SET enabled = ?1 WHERE id = ?2",
                    params![enabled, id.as_str()],
                )?;
            }
            if let Some(policy) = update.overlap_policy {
                set_col(conn, id, "overlap_policy", policy.as_sql())?;
            }
            if let Some(policy) = update.session_policy {
                set_col(conn, id, "session_policy", policy.as_sql())?;
            }
            if let Some(next) = update.next_run_at {
                let _ = conn.execute(
                    "UPDATE schedules SET next_run_at = ?1 WHERE id = ?2",
                    params![next.map(to_sql), id.as_str()],
                )?;
            }
            if let Some(targets) = &update.targets {
                let _ = conn.execute(
                    "DELETE FROM schedule_targets WHERE schedule_id = ?1",
                    params![id.as_str()],
                )?;
                insert_targets(conn, id, targets)?;
            }
            let _ = conn.execute(
                "UPDATE schedules SET updated_at = ?1 WHERE id = ?2",
                params![now_sql(), id.as_str()],
            )?;
            Ok(())
        })?;
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("schedule", id.as_str()))
    }

    /// Advance the run clock after a firing: `last_run_at := fired_at`,
    /// `next_run_at := next`. One statement, so the pair is atomic.
    pub fn advance_run_times(
        conn: &Connection,
        id: &ScheduleId,
        fired_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let n = conn.execute(
            "UPDATE schedules SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
            params![to_sql(fired_at), next.map(to_sql), id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("schedule", id.as_str()));
        }
        Ok(())
    }

    /// Delete a schedule; targets and executions cascade.
    pub fn delete(conn: &Connection, id: &ScheduleId) -> Result<bool> {
        let n = conn.execute("DELETE FROM schedules WHERE id = ?1", params![id.as_str()])?;
        Ok(n > 0)
    }

    /// Delete every schedule that targets only the given project, and strip
    /// the project's targets from multi-target schedules. Project-deletion
    /// cascade.
    pub fn purge_project(conn: &Connection, project: &ProjectId) -> Result<()> {
        in_tx(conn, || {
            let _ = conn.execute(
                "DELETE FROM schedule_targets WHERE project_id = ?1",
                params![project.as_str()],
            )?;
            let _ = conn.execute(
                "DELETE FROM schedules WHERE id NOT IN
                 (SELECT DISTINCT schedule_id FROM schedule_targets)",
                [],
            )?;
            Ok(())
        })
    }

    /// Targets of one schedule.
    pub fn targets(conn: &Connection, id: &ScheduleId) -> Result<Vec<ScheduleTarget>> {
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, project_id, workspace_id
             FROM schedule_targets WHERE schedule_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            let id: String = row.get(0)?;
            let schedule_id: String = row.get(1)?;
            let project_id: String = row.get(2)?;
            let workspace_id: Option<String> = row.get(3)?;
            Ok(ScheduleTarget {
                id,
                schedule_id: ScheduleId::from(schedule_id),
                project_id: ProjectId::from(project_id),
                workspace_id: workspace_id.map(WorkspaceId::from),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn insert_targets(
    conn: &Connection,
    schedule_id: &ScheduleId,
    targets: &[(ProjectId, Option<WorkspaceId>)],
) -> Result<()> {
    for (index, (project, workspace)) in targets.iter().enumerate() {
        let _ = conn.execute(
            "INSERT INTO schedule_targets (id, schedule_id, project_id, workspace_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format!("{}_{index}", schedule_id.as_str()),
                schedule_id.as_str(),
                project.as_str(),
                workspace.as_ref().map(WorkspaceId::as_str),
            ],
        )?;
    }
    Ok(())
}

fn set_col(conn: &Connection, id: &ScheduleId, col: &str, value: &str) -> Result<()> {
    let _ = conn.execute(
        &format!("UPDATE schedules SET {col} = ?1 WHERE id = ?2"),
        params![value, id.as_str()],
    )?;
    Ok(())
}

fn in_tx(conn: &Connection, body: impl FnOnce() -> Result<()>) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match body() {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

const SELECT_COLS: &str = "SELECT id, name, cron, prompt, enabled, overlap_policy,
    session_policy, creator_token_id, creator_scope, last_run_at, next_run_at,
    created_at, updated_at";

type RowResult = std::result::Result<Result<ScheduleRecord>, rusqlite::Error>;

fn row_to_record(row: &rusqlite::Row<'_>) -> RowResult {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let cron: String = row.get(2)?;
    let prompt: String = row.get(3)?;
    let enabled: bool = row.get(4)?;
    let overlap: String = row.get(5)?;
    let session: String = row.get(6)?;
    let creator_token_id: String = row.get(7)?;
    let creator_scope: String = row.get(8)?;
    let last_run_at: Option<String> = row.get(9)?;
    let next_run_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok((|| {
        let overlap_policy =
            OverlapPolicy::from_sql(&overlap).ok_or_else(|| StoreError::Corrupt {
                entity: "schedule",
                id: id.clone(),
                message: format!("unknown overlap policy '{overlap}'"),
            })?;
        let session_policy =
            SessionPolicy::from_sql(&session).ok_or_else(|| StoreError::Corrupt {
                entity: "schedule",
                id: id.clone(),
                message: format!("unknown session policy '{session}'"),
            })?;
        Ok(ScheduleRecord {
            name,
            cron,
            prompt,
            enabled,
            overlap_policy,
            session_policy,
            creator_token_id: TokenId::from(creator_token_id),
            creator_scope,
            last_run_at: parse_opt_ts("schedule", &id, last_run_at)?,
            next_run_at: parse_opt_ts("schedule", &id, next_run_at)?,
            created_at: parse_ts("schedule", &id, &created_at)?,
            updated_at: parse_ts("schedule", &id, &updated_at)?,
            targets: Vec::new(),
            id: ScheduleId::from(id),
        })
    })())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
