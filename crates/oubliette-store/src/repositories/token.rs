//! Token table access.

use rusqlite::{params, Connection, OptionalExtension};

use chrono::{DateTime, Utc};
use oubliette_core::TokenId;

use super::{now_sql, parse_opt_ts, parse_ts, to_sql};
use crate::errors::{Result, StoreError};
use crate::types::TokenRecord;

/// Repository for the `tokens` table.
pub struct TokenRepository;

impl TokenRepository {
    /// Insert a token row.
    pub fn insert(
        conn: &Connection,
        record: &TokenRecord,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO tokens (id, name, scope, created_at, last_used_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.as_str(),
                record.name,
                record.scope,
                to_sql(record.created_at),
                record.last_used_at.map(to_sql),
                record.expires_at.map(to_sql),
            ],
        )?;
        Ok(())
    }

    /// Fetch a token by bearer string.
    pub fn get(conn: &Connection, id: &TokenId) -> Result<Option<TokenRecord>> {
        conn.query_row(
            "SELECT id, name, scope, created_at, last_used_at, expires_at
             FROM tokens WHERE id = ?1",
            params![id.as_str()],
            row_to_record,
        )
        .optional()?
        .transpose()
    }

    /// List all tokens, newest first.
    pub fn list(conn: &Connection) -> Result<Vec<TokenRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, scope, created_at, last_used_at, expires_at
             FROM tokens ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Delete a token. Returns whether a row was removed.
    pub fn delete(conn: &Connection, id: &TokenId) -> Result<bool> {
        let n = conn.execute("DELETE FROM tokens WHERE id = ?1", params![id.as_str()])?;
        Ok(n > 0)
    }

    /// Stamp `last_used_at` with the current time. Fire-and-forget callers
    /// ignore the result.
    pub fn touch(conn: &Connection, id: &TokenId) -> Result<()> {
        let _ = conn.execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![now_sql(), id.as_str()],
        )?;
        Ok(())
    }
}

type RowResult = std::result::Result<Result<TokenRecord>, rusqlite::Error>;

fn row_to_record(row: &rusqlite::Row<'_>) -> RowResult {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let scope: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let last_used_at: Option<String> = row.get(4)?;
    let expires_at: Option<String> = row.get(5)?;
    Ok(build_record(id, name, scope, created_at, last_used_at, expires_at))
}

fn build_record(
    id: String,
    name: String,
    scope: String,
    created_at: String,
    last_used_at: Option<String>,
    expires_at: Option<String>,
) -> Result<TokenRecord> {
    let created_at: DateTime<Utc> = parse_ts("token", &id, &created_at)?;
    let last_used_at = parse_opt_ts("token", &id, last_used_at)?;
    let expires_at = parse_opt_ts("token", &id, expires_at)?;
    Ok(TokenRecord {
        id: TokenId::from(id),
        name,
        scope,
        created_at,
        last_used_at,
        expires_at,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
