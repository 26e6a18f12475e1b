//! # oubliette-store
//!
//! SQLite persistence for the control plane.
//!
//! - [`connection`]: `r2d2` pool with WAL mode, busy timeout, and foreign
//!   keys applied to every connection.
//! - [`migrations`]: version-tracked schema, embedded at compile time and
//!   run transactionally.
//! - [`types`]: the persisted records and their storage enums.
//! - [`repositories`]: stateless repository structs — each method takes a
//!   `&Connection` and executes SQL. No shared mutable state.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod types;

pub use repositories::{
    ExecutionRepository, ScheduleRepository, SessionRepository, TokenRepository,
};

pub use connection::{new_file, new_in_memory, ConnectionConfig, ConnectionPool, PooledConnection};
pub use errors::StoreError;
pub use migrations::run_migrations;

/// Open an in-memory pool with migrations applied. Test helper used across
/// the workspace.
pub fn open_test_pool() -> ConnectionPool {
    let pool = new_in_memory(&ConnectionConfig::default()).expect("in-memory pool");
    {
        let conn = pool.get().expect("connection");
        let _ = run_migrations(&conn).expect("migrations");
    }
    pool
}
