//! The tick loop and firing machinery.
//!
//! Once per wall-clock minute, due schedules are selected in ascending
//! `next_run_at` order and dispatched. The run clock advances from the
//! firing instant at dispatch time, so a process that slept through N
//! ticks fires each overdue schedule exactly once, never once per missed
//! minute.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oubliette_core::{ExecutionId, Scope, ToolAccess, ToolTarget};
use oubliette_store::repositories::{ExecutionRepository, ScheduleRepository};
use oubliette_store::types::{
    ExecutionRecord, ExecutionStatus, OverlapPolicy, ScheduleRecord, ScheduleTarget, SessionPolicy,
};

use crate::cronspec;
use crate::errors::ScheduleError;
use crate::launcher::LaunchRequest;
use crate::service::Scheduler;

/// Tick period.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

impl Scheduler {
    /// Run the tick loop until the token cancels. Returns the task handle.
    pub fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("scheduler tick loop started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if let Err(e) = scheduler.tick_once(Utc::now()).await {
                    error!(error = %e, "scheduler tick failed");
                }
            }
            info!("scheduler tick loop stopped");
        })
    }

    /// One tick at `now`: select due schedules and dispatch each once.
    /// Returns how many schedules were dispatched (fired or skipped).
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<usize, ScheduleError> {
        let due = {
            let conn = self.conn()?;
            ScheduleRepository::due(&conn, now)?
        };
        let count = due.len();

        for schedule in due {
            // Advance the run clock first; the pair is one atomic update,
            // and a crash after it means at-most-once for this tick.
            let next = match cronspec::next_run(&schedule.cron, now) {
                Ok(next) => next,
                Err(e) => {
                    warn!(schedule = %schedule.id, error = %e, "stored cron no longer parses");
                    None
                }
            };
            {
                let conn = self.conn()?;
                ScheduleRepository::advance_run_times(&conn, &schedule.id, now, next)?;
            }

            let overlapping = self
                .in_flight
                .get(&schedule.id)
                .map(|count| *count > 0)
                .unwrap_or(false);
            let suppress = overlapping
                && matches!(
                    schedule.overlap_policy,
                    OverlapPolicy::Skip | OverlapPolicy::Queue
                );
            if suppress {
                self.record_all_skipped(&schedule, now)?;
                continue;
            }

            *self.in_flight.entry(schedule.id.clone()).or_insert(0) += 1;
            let scheduler = self.clone();
            let _ = tokio::spawn(async move {
                scheduler.fire(&schedule, now).await;
                if let Some(mut entry) = scheduler.in_flight.get_mut(&schedule.id) {
                    *entry = entry.saturating_sub(1);
                }
            });
        }

        Ok(count)
    }

    /// Fire every target of a schedule now, ignoring the enabled flag and
    /// the overlap policy, without touching the run clock. The manual
    /// trigger.
    pub async fn trigger_now(
        &self,
        id: &oubliette_core::ScheduleId,
    ) -> Result<Vec<ExecutionRecord>, ScheduleError> {
        let schedule = self.get(id)?;
        let now = Utc::now();
        *self.in_flight.entry(schedule.id.clone()).or_insert(0) += 1;
        let executions = self.fire(&schedule, now).await;
        if let Some(mut entry) = self.in_flight.get_mut(&schedule.id) {
            *entry = entry.saturating_sub(1);
        }
        Ok(executions)
    }

    /// Fire all targets of one schedule. Per-target failures are
    /// independent; every attempt leaves an execution row.
    async fn fire(&self, schedule: &ScheduleRecord, fired_at: DateTime<Utc>) -> Vec<ExecutionRecord> {
        debug!(schedule = %schedule.id, targets = schedule.targets.len(), "firing schedule");
        let mut executions = Vec::with_capacity(schedule.targets.len());
        for target in &schedule.targets {
            let execution = self.fire_target(schedule, target, fired_at).await;
            if let Ok(conn) = self.conn() {
                if let Err(e) = ExecutionRepository::insert(&conn, &execution) {
                    error!(schedule = %schedule.id, error = %e, "failed to record execution");
                }
            }
            executions.push(execution);
        }
        executions
    }

    async fn fire_target(
        &self,
        schedule: &ScheduleRecord,
        target: &ScheduleTarget,
        fired_at: DateTime<Utc>,
    ) -> ExecutionRecord {
        let started = std::time::Instant::now();
        let base = ExecutionRecord {
            id: ExecutionId::new(),
            schedule_id: schedule.id.clone(),
            target_project_id: target.project_id.clone(),
            target_workspace_id: target.workspace_id.clone(),
            status: ExecutionStatus::Failed,
            session_id: None,
            error: None,
            duration_ms: None,
            started_at: fired_at,
        };

        // Fire-time authorization against the stored creator scope. A
        // revoked grant fails the execution; the run clock has already
        // advanced.
        let scope: Scope = match schedule.creator_scope.parse() {
            Ok(scope) => scope,
            Err(_) => {
                return ExecutionRecord {
                    error: Some(format!(
                        "stored creator scope '{}' no longer parses",
                        schedule.creator_scope
                    )),
                    ..base
                };
            }
        };
        if !scope.allows(ToolTarget::Project, ToolAccess::Write, Some(&target.project_id)) {
            return ExecutionRecord {
                error: Some(format!(
                    "creator scope '{scope}' no longer grants write on {}",
                    target.project_id
                )),
                ..base
            };
        }

        let key = Self::session_key(&schedule.id, &target.project_id, target.workspace_id.as_ref());
        let reuse_session = match schedule.session_policy {
            SessionPolicy::Resume => self.schedule_sessions.get(&key).map(|s| s.clone()),
            SessionPolicy::New => None,
        };

        let request = LaunchRequest {
            schedule_id: schedule.id.clone(),
            project_id: target.project_id.clone(),
            workspace_id: target.workspace_id.clone(),
            prompt: schedule.prompt.clone(),
            session_policy: schedule.session_policy,
            reuse_session,
            creator_token_id: schedule.creator_token_id.clone(),
            creator_scope: schedule.creator_scope.clone(),
        };

        match self.launcher.launch(&request).await {
            Ok(session_id) => {
                let _ = self.schedule_sessions.insert(key, session_id.clone());
                ExecutionRecord {
                    status: ExecutionStatus::Success,
                    session_id: Some(session_id),
                    duration_ms: Some(elapsed_ms(started)),
                    ..base
                }
            }
            Err(e) => {
                warn!(schedule = %schedule.id, project = %target.project_id, error = %e, "target firing failed");
                ExecutionRecord {
                    error: Some(e.to_string()),
                    duration_ms: Some(elapsed_ms(started)),
                    ..base
                }
            }
        }
    }

    fn record_all_skipped(
        &self,
        schedule: &ScheduleRecord,
        fired_at: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let conn = self.conn()?;
        for target in &schedule.targets {
            ExecutionRepository::insert(
                &conn,
                &ExecutionRecord {
                    id: ExecutionId::new(),
                    schedule_id: schedule.id.clone(),
                    target_project_id: target.project_id.clone(),
                    target_workspace_id: target.workspace_id.clone(),
                    status: ExecutionStatus::Skipped,
                    session_id: None,
                    error: Some("previous firing still in flight".to_owned()),
                    duration_ms: None,
                    started_at: fired_at,
                },
            )?;
        }
        debug!(schedule = %schedule.id, "firing skipped, previous still in flight");
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
