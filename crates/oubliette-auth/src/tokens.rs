//! Token lifecycle: issue, validate, list, revoke.
//!
//! Validation order matters: prefix check, lookup, expiry. The last-used
//! stamp is written off the hot path and never for rejected attempts.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use oubliette_core::{Scope, TokenId};
use oubliette_store::repositories::TokenRepository;
use oubliette_store::types::TokenRecord;
use oubliette_store::ConnectionPool;

use crate::errors::AuthError;

/// The authenticated identity attached to a request, a relay call, or a
/// scheduled firing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    /// The validated token.
    pub token_id: TokenId,
    /// Parsed scope.
    pub scope: Scope,
}

/// Token store facade over the `tokens` table.
#[derive(Clone)]
pub struct TokenService {
    pool: ConnectionPool,
}

impl TokenService {
    /// Create a service over the shared pool.
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Issue a new token. The returned record's `id` is the secret; it is
    /// shown once and never recoverable.
    pub fn issue(
        &self,
        name: &str,
        scope: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<TokenRecord, AuthError> {
        let parsed: Scope = scope
            .parse()
            .map_err(|_| AuthError::InvalidScope(scope.to_owned()))?;
        let record = TokenRecord {
            id: TokenId::new(),
            name: name.to_owned(),
            scope: parsed.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        };
        let conn = self.pool.get().map_err(oubliette_store::StoreError::Pool)?;
        TokenRepository::insert(&conn, &record)?;
        debug!(token = %record.name, scope = %record.scope, "token issued");
        Ok(record)
    }

    /// Validate a bearer string and return the caller's identity.
    ///
    /// On success the last-used stamp is updated fire-and-forget; a rejected
    /// attempt never touches the row.
    pub fn validate(&self, bearer: &str) -> Result<AuthIdentity, AuthError> {
        if bearer.is_empty() {
            return Err(AuthError::MissingBearer);
        }
        if !TokenId::has_prefix(bearer) {
            return Err(AuthError::MalformedBearer);
        }
        let id = TokenId::from(bearer);
        let conn = self.pool.get().map_err(oubliette_store::StoreError::Pool)?;
        let record = TokenRepository::get(&conn, &id)?.ok_or(AuthError::UnknownToken)?;

        if let Some(expires_at) = record.expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::TokenExpired);
            }
        }

        let scope: Scope = record
            .scope
            .parse()
            .map_err(|_| AuthError::InvalidScope(record.scope.clone()))?;

        self.touch_detached(id.clone());
        Ok(AuthIdentity { token_id: id, scope })
    }

    /// List all tokens. Secrets are included; callers redact for the wire.
    pub fn list(&self) -> Result<Vec<TokenRecord>, AuthError> {
        let conn = self.pool.get().map_err(oubliette_store::StoreError::Pool)?;
        Ok(TokenRepository::list(&conn)?)
    }

    /// Revoke a token. Returns whether it existed.
    pub fn revoke(&self, id: &TokenId) -> Result<bool, AuthError> {
        let conn = self.pool.get().map_err(oubliette_store::StoreError::Pool)?;
        Ok(TokenRepository::delete(&conn, id)?)
    }

    /// Stamp last-used without blocking the caller. Outside a tokio runtime
    /// (CLI paths) the stamp is skipped; validation results are unaffected.
    fn touch_detached(&self, id: TokenId) {
        let pool = self.pool.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let _ = handle.spawn_blocking(move || match pool.get() {
                Ok(conn) => {
                    if let Err(e) = TokenRepository::touch(&conn, &id) {
                        warn!(error = %e, "failed to stamp token last-used");
                    }
                }
                Err(e) => warn!(error = %e, "failed to get connection for last-used stamp"),
            });
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use oubliette_store::open_test_pool;

    fn make_service() -> TokenService {
        TokenService::new(open_test_pool())
    }

    #[test]
    fn issue_and_validate_roundtrip() {
        let svc = make_service();
        let record = svc.issue("ci", "admin", None).unwrap();
        assert!(record.id.as_str().starts_with("oub_"));

        let identity = svc.validate(record.id.as_str()).unwrap();
        assert_eq!(identity.token_id, record.id);
        assert_eq!(identity.scope, Scope::Admin);
    }

    #[test]
    fn issue_rejects_bad_scope() {
        let svc = make_service();
        let err = svc.issue("bad", "superuser", None).unwrap_err();
        assert_matches!(err, AuthError::InvalidScope(_));
    }

    #[test]
    fn validate_rejects_empty_and_malformed() {
        let svc = make_service();
        assert_matches!(svc.validate("").unwrap_err(), AuthError::MissingBearer);
        assert_matches!(
            svc.validate("sk-not-ours").unwrap_err(),
            AuthError::MalformedBearer
        );
    }

    #[test]
    fn validate_rejects_unknown() {
        let svc = make_service();
        assert_matches!(
            svc.validate(TokenId::new().as_str()).unwrap_err(),
            AuthError::UnknownToken
        );
    }

    #[test]
    fn expired_token_rejected_without_touch() {
        let svc = make_service();
        let record = svc
            .issue("old", "admin", Some(Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();

        assert_matches!(
            svc.validate(record.id.as_str()).unwrap_err(),
            AuthError::TokenExpired
        );

        // last_used must not be stamped for the rejected attempt
        let loaded = svc
            .list()
            .unwrap()
            .into_iter()
            .find(|t| t.id == record.id)
            .unwrap();
        assert!(loaded.last_used_at.is_none());
    }

    #[tokio::test]
    async fn validate_stamps_last_used() {
        let svc = make_service();
        let record = svc.issue("used", "admin", None).unwrap();
        let _ = svc.validate(record.id.as_str()).unwrap();

        // the stamp is async; poll briefly
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let loaded = svc
                .list()
                .unwrap()
                .into_iter()
                .find(|t| t.id == record.id)
                .unwrap();
            if loaded.last_used_at.is_some() {
                return;
            }
        }
        panic!("last_used_at was never stamped");
    }

    #[test]
    fn revoke_removes_token() {
        let svc = make_service();
        let record = svc.issue("gone", "project:proj_a", None).unwrap();
        assert!(svc.revoke(&record.id).unwrap());
        assert_matches!(
            svc.validate(record.id.as_str()).unwrap_err(),
            AuthError::UnknownToken
        );
    }

    #[test]
    fn project_scope_parses_through() {
        let svc = make_service();
        let record = svc.issue("scoped", "project:proj_a:ro", None).unwrap();
        let identity = svc.validate(record.id.as_str()).unwrap();
        assert_eq!(
            identity.scope,
            Scope::ProjectReadOnly(oubliette_core::ProjectId::from("proj_a"))
        );
    }
}
