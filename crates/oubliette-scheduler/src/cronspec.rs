//! Standard 5-field cron handling.
//!
//! The `cron` crate wants a seconds field; we accept the classic 5-field
//! form (minute hour day-of-month month day-of-week) and pin seconds to 0.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::errors::ScheduleError;

/// Parse a 5-field cron expression.
pub fn parse(expr: &str) -> Result<Schedule, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::InvalidCron {
            expr: expr.to_owned(),
            detail: format!("expected 5 fields, got {}", fields.len()),
        });
    }
    let with_seconds = format!("0 {expr}");
    Schedule::from_str(&with_seconds).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_owned(),
        detail: e.to_string(),
    })
}

/// The first instant strictly after `after` matching the expression.
pub fn next_run(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = parse(expr)?;
    Ok(schedule.after(&after).next())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
