//! Schedule management: create, update, list, delete, history.
//!
//! Validation happens here (cron parse, target presence); `next_run_at` is
//! computed at create time and recomputed whenever the cron changes.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use oubliette_core::{ProjectId, ScheduleId, SessionId, TokenId, WorkspaceId};
use oubliette_store::repositories::{ExecutionRepository, ScheduleRepository};
use oubliette_store::types::{
    ExecutionRecord, NewSchedule, OverlapPolicy, ScheduleRecord, ScheduleUpdate, SessionPolicy,
};
use oubliette_store::ConnectionPool;

use crate::cronspec;
use crate::errors::ScheduleError;
use crate::launcher::ScheduleLauncher;

/// Inputs for creating a schedule.
#[derive(Clone, Debug)]
pub struct ScheduleCreate {
    /// Operator-visible name.
    pub name: String,
    /// 5-field cron expression.
    pub cron: String,
    /// Prompt to re-drive at each firing.
    pub prompt: String,
    /// Enabled flag.
    pub enabled: bool,
    /// Overlap policy.
    pub overlap_policy: OverlapPolicy,
    /// Session policy.
    pub session_policy: SessionPolicy,
    /// Creating token.
    pub creator_token_id: TokenId,
    /// Creator scope string, stored for fire-time authorization.
    pub creator_scope: String,
    /// Targets: (project, workspace?).
    pub targets: Vec<(ProjectId, Option<WorkspaceId>)>,
}

/// The scheduler: CRUD here, the tick loop in [`crate::runner`]. Cloning
/// is cheap; every clone shares the pool and the in-flight accounting, so
/// firing tasks carry their own handle.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) pool: ConnectionPool,
    pub(crate) launcher: Arc<dyn ScheduleLauncher>,
    /// Firings currently running, per schedule.
    pub(crate) in_flight: Arc<DashMap<ScheduleId, usize>>,
    /// Sessions this scheduler created, keyed per (schedule, target); used
    /// by the `resume` session policy.
    pub(crate) schedule_sessions: Arc<DashMap<String, SessionId>>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(pool: ConnectionPool, launcher: Arc<dyn ScheduleLauncher>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            launcher,
            in_flight: Arc::new(DashMap::new()),
            schedule_sessions: Arc::new(DashMap::new()),
        })
    }

    /// Create a schedule. The cron is validated and `next_run_at` seeded
    /// from the current instant.
    pub fn create(&self, input: ScheduleCreate) -> Result<ScheduleRecord, ScheduleError> {
        if input.name.trim().is_empty() {
            return Err(ScheduleError::Validation("schedule name is required".into()));
        }
        if input.prompt.trim().is_empty() {
            return Err(ScheduleError::Validation("prompt is required".into()));
        }
        if input.targets.is_empty() {
            return Err(ScheduleError::Validation("at least one target is required".into()));
        }
        let next_run_at = cronspec::next_run(&input.cron, Utc::now())?;

        let conn = self.conn()?;
        let record = ScheduleRepository::insert(
            &conn,
            &NewSchedule {
                name: input.name,
                cron: input.cron,
                prompt: input.prompt,
                enabled: input.enabled,
                overlap_policy: input.overlap_policy,
                session_policy: input.session_policy,
                creator_token_id: input.creator_token_id,
                creator_scope: input.creator_scope,
                next_run_at,
                targets: input.targets,
            },
        )?;
        info!(schedule = %record.id, cron = %record.cron, "schedule created");
        Ok(record)
    }

    /// Apply a partial update; a cron change recomputes `next_run_at`.
    pub fn update(
        &self,
        id: &ScheduleId,
        mut update: ScheduleUpdate,
    ) -> Result<ScheduleRecord, ScheduleError> {
        let conn = self.conn()?;
        let _ = ScheduleRepository::get(&conn, id)?
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;

        if let Some(cron) = &update.cron {
            update.next_run_at = Some(cronspec::next_run(cron, Utc::now())?);
        }
        if let Some(targets) = &update.targets {
            if targets.is_empty() {
                return Err(ScheduleError::Validation(
                    "at least one target is required".into(),
                ));
            }
        }
        Ok(ScheduleRepository::update(&conn, id, &update)?)
    }

    /// Fetch one schedule.
    pub fn get(&self, id: &ScheduleId) -> Result<ScheduleRecord, ScheduleError> {
        let conn = self.conn()?;
        ScheduleRepository::get(&conn, id)?.ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }

    /// List all schedules.
    pub fn list(&self) -> Result<Vec<ScheduleRecord>, ScheduleError> {
        let conn = self.conn()?;
        Ok(ScheduleRepository::list(&conn)?)
    }

    /// Delete a schedule and its history.
    pub fn delete(&self, id: &ScheduleId) -> Result<bool, ScheduleError> {
        let conn = self.conn()?;
        Ok(ScheduleRepository::delete(&conn, id)?)
    }

    /// Recent executions of a schedule, newest first.
    pub fn executions(
        &self,
        id: &ScheduleId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, ScheduleError> {
        let conn = self.conn()?;
        Ok(ExecutionRepository::list_for_schedule(&conn, id, limit)?)
    }

    /// Remove schedules targeting a deleted project (cascade).
    pub fn purge_project(&self, project: &ProjectId) -> Result<(), ScheduleError> {
        let conn = self.conn()?;
        Ok(ScheduleRepository::purge_project(&conn, project)?)
    }

    pub(crate) fn conn(
        &self,
    ) -> Result<oubliette_store::PooledConnection, ScheduleError> {
        self.pool
            .get()
            .map_err(|e| ScheduleError::Store(oubliette_store::StoreError::Pool(e)))
    }

    pub(crate) fn session_key(
        schedule: &ScheduleId,
        project: &ProjectId,
        workspace: Option<&WorkspaceId>,
    ) -> String {
        format!(
            "{schedule}/{project}/{}",
            workspace.map_or("default", |w| w.as_str())
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
