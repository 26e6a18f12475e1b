//! Stateless repositories, one per table family.

mod execution;
mod schedule;
mod session;
mod token;

pub use execution::ExecutionRepository;
pub use schedule::ScheduleRepository;
pub use session::{SessionFilter, SessionRepository};
pub use token::TokenRepository;

use chrono::{DateTime, Utc};

use crate::errors::StoreError;

/// Current UTC time serialized for storage.
pub(crate) fn now_sql() -> String {
    to_sql(Utc::now())
}

/// Serialize a timestamp for storage. Fixed-width millisecond RFC 3339 with
/// a `Z` suffix, so lexicographic order matches chronological order.
pub(crate) fn to_sql(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Decode a stored timestamp.
pub(crate) fn parse_ts(
    entity: &'static str,
    id: &str,
    value: &str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            entity,
            id: id.to_owned(),
            message: format!("bad timestamp '{value}': {e}"),
        })
}

/// Decode an optional stored timestamp.
pub(crate) fn parse_opt_ts(
    entity: &'static str,
    id: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_ts(entity, id, &v)).transpose()
}
