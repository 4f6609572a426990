//! Postgres implementation of the auth store.
//!
//! TTLs and expiry checks happen database-side (`NOW()` arithmetic) so every
//! instance agrees on time. Uniqueness is enforced by the schema, not here;
//! this module only translates SQLSTATE 23505 into [`StoreError::Conflict`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::error::StoreError;
use crate::auth::utils::is_unique_violation;

use super::{
    AuthStore, CredentialRecord, RegisteredUser, SessionParams, SessionRecord, UserRecord,
};

const EMAIL_PROVIDER: &str = "EMAIL";
const EMAIL_VERIFY_KIND: &str = "EMAIL_VERIFY";

#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn store_error(err: sqlx::Error, what: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(what))
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn create_user_with_credential(
        &self,
        email: &str,
        password_hash: &str,
        session: SessionParams,
    ) -> Result<RegisteredUser, StoreError> {
        // One transaction so a half-registered user can never exist: either
        // User, Credential, and Session all land, or none do.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin register transaction")?;

        let query = "INSERT INTO users (email) VALUES ($1) RETURNING id";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await;
        let user_id: Uuid = match row {
            Ok(row) => row.get("id"),
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(store_error(err, "failed to insert user"));
            }
        };

        let query = r"
            INSERT INTO credentials (user_id, email, auth_provider, password_hash)
            VALUES ($1, $2, $3, $4)
        ";
        if let Err(err) = sqlx::query(query)
            .bind(user_id)
            .bind(email)
            .bind(EMAIL_PROVIDER)
            .bind(password_hash)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
        {
            let _ = tx.rollback().await;
            return Err(store_error(err, "failed to insert credential"));
        }

        let query = r"
            INSERT INTO sessions (user_id, token_hash, user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(&session.token_digest)
            .bind(&session.user_agent)
            .bind(&session.ip)
            .bind(session.ttl_seconds)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await;
        let session_id: Uuid = match row {
            Ok(row) => row.get("id"),
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(store_error(err, "failed to insert session"));
            }
        };

        tx.commit()
            .await
            .context("failed to commit register transaction")?;

        Ok(RegisteredUser {
            user_id,
            session_id,
        })
    }

    async fn find_password_credential(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let query = r"
            SELECT credentials.id, credentials.user_id, credentials.email,
                   credentials.password_hash
            FROM credentials
            JOIN users ON users.id = credentials.user_id
            WHERE credentials.email = $1
              AND credentials.auth_provider = $2
              AND users.deleted_at IS NULL
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(EMAIL_PROVIDER)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| store_error(err, "failed to lookup credential"))?;

        Ok(row.map(|row| CredentialRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn record_sign_in(&self, credential_id: Uuid) -> Result<(), StoreError> {
        let query = r"
            UPDATE credentials
            SET last_sign_in_at = NOW(), updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(credential_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| store_error(err, "failed to record sign-in"))?;
        Ok(())
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        session: SessionParams,
    ) -> Result<Uuid, StoreError> {
        let query = r"
            INSERT INTO sessions (user_id, token_hash, user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(&session.token_digest)
            .bind(&session.user_agent)
            .bind(&session.ip)
            .bind(session.ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| store_error(err, "failed to insert session"))?;
        Ok(row.get("id"))
    }

    async fn find_active_session(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<SessionRecord>, StoreError> {
        let query = r"
            SELECT id, user_id, EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix
            FROM sessions
            WHERE token_hash = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_digest)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| store_error(err, "failed to lookup session"))?;

        Ok(row.map(|row| SessionRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            expires_at_unix: row.get("expires_at_unix"),
        }))
    }

    async fn rotate_session(
        &self,
        old_digest: &[u8],
        new_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<Option<Uuid>, StoreError> {
        // Single conditional update: compare-old-digest-then-replace. Two
        // concurrent refreshes with the same token race on this row and
        // exactly one of them matches.
        let query = r"
            UPDATE sessions
            SET token_hash = $2,
                expires_at = NOW() + ($3 * INTERVAL '1 second')
            WHERE token_hash = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(old_digest)
            .bind(new_digest)
            .bind(ttl_seconds)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| store_error(err, "failed to rotate session"))?;

        Ok(row.map(|row| row.get("user_id")))
    }

    async fn revoke_session(&self, token_digest: &[u8]) -> Result<bool, StoreError> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW()
            WHERE token_hash = $1
              AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(token_digest)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| store_error(err, "failed to revoke session"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW()
            WHERE user_id = $1
              AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| store_error(err, "failed to revoke sessions"))?;
        Ok(result.rows_affected())
    }

    async fn insert_verification_token(
        &self,
        user_id: Uuid,
        token_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO verification_tokens (user_id, token_hash, kind, expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(token_digest)
            .bind(EMAIL_VERIFY_KIND)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| store_error(err, "failed to insert verification token"))?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<Uuid>, StoreError> {
        // Mark the token used and flag the owner verified in one
        // transaction; a second presentation matches nothing.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin verify-email transaction")?;

        let query = r"
            UPDATE verification_tokens
            SET used_at = NOW()
            WHERE token_hash = $1
              AND used_at IS NULL
              AND expires_at > NOW()
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(token_digest)
            .fetch_optional(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| store_error(err, "failed to consume verification token"))?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(None);
        };
        let user_id: Uuid = row.get("user_id");

        let query = r"
            UPDATE users
            SET is_email_verified = TRUE,
                email_verified_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
        ";
        if let Err(err) = sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
        {
            let _ = tx.rollback().await;
            return Err(store_error(err, "failed to mark user verified"));
        }

        tx.commit()
            .await
            .context("failed to commit verify-email transaction")?;

        Ok(Some(user_id))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let query = r"
            SELECT id, email, is_email_verified,
                   EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix
            FROM users
            WHERE id = $1
              AND deleted_at IS NULL
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| store_error(err, "failed to lookup user"))?;

        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            email: row.get("email"),
            is_email_verified: row.get("is_email_verified"),
            created_at_unix: row.get("created_at_unix"),
        }))
    }
}
