//! # oubliette-scheduler
//!
//! Persistent, overlap-aware, at-most-once-per-tick schedule execution.
//!
//! The tick loop wakes once per wall-clock minute, selects due schedules,
//! and dispatches each firing as its own task through a [`ScheduleLauncher`]
//! seam. The run clock (`last_run_at` / `next_run_at`) advances at dispatch
//! time from the firing instant, so downtime never produces catch-up storms.

#![deny(unsafe_code)]

pub mod cronspec;
pub mod errors;
pub mod launcher;
pub mod runner;
pub mod service;

pub use errors::ScheduleError;
pub use launcher::{LaunchError, LaunchRequest, ScheduleLauncher};
pub use service::{ScheduleCreate, Scheduler};
