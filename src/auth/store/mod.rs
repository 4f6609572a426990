//! Persistence seam for users, credentials, sessions, and verification tokens.
//!
//! The orchestrator only depends on the [`AuthStore`] trait; the Postgres
//! implementation lives in [`pg`], and [`memory`] provides an in-process
//! double for tests and single-process development.

mod memory;
mod pg;

pub use memory::MemoryAuthStore;
pub use pg::PgAuthStore;

use async_trait::async_trait;
use uuid::Uuid;

use super::error::StoreError;

/// Client metadata and lifetime for a session row. The raw refresh token
/// never reaches the store; only its digest does.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub token_digest: Vec<u8>,
    pub ttl_seconds: i64,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Result of a successful registration transaction.
#[derive(Clone, Copy, Debug)]
pub struct RegisteredUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// Password credential row for the EMAIL provider.
#[derive(Clone, Debug)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    /// Absent for credentials created by non-password providers.
    pub password_hash: Option<String>,
}

/// A usable (non-revoked, unexpired) session.
#[derive(Clone, Copy, Debug)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at_unix: i64,
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub is_email_verified: bool,
    pub created_at_unix: i64,
}

/// Transactional persistence collaborator for the auth engine.
///
/// Atomicity contracts the engine relies on rather than re-derives:
/// registration writes User + Credential + Session all-or-nothing,
/// rotation is a single conditional update, and verification consumes the
/// token and marks the user verified in one transaction.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Create User, EMAIL Credential, and first Session in one transaction.
    /// A uniqueness violation anywhere inside surfaces as
    /// [`StoreError::Conflict`] and leaves no rows behind.
    async fn create_user_with_credential(
        &self,
        email: &str,
        password_hash: &str,
        session: SessionParams,
    ) -> Result<RegisteredUser, StoreError>;

    /// Look up the EMAIL-provider credential for an address.
    async fn find_password_credential(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Record a successful sign-in on a credential.
    async fn record_sign_in(&self, credential_id: Uuid) -> Result<(), StoreError>;

    /// Persist a new session for an existing user.
    async fn insert_session(
        &self,
        user_id: Uuid,
        session: SessionParams,
    ) -> Result<Uuid, StoreError>;

    /// Find a session by digest, applying both revocation and expiry
    /// filters; an expired-but-not-revoked row is treated as absent.
    async fn find_active_session(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Atomically replace an active session's digest and refresh its expiry.
    /// Returns the owner when a matching active session was rotated, `None`
    /// otherwise. Once rotated, the old digest can never succeed again.
    async fn rotate_session(
        &self,
        old_digest: &[u8],
        new_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Revoke the session matching the digest. Returns whether a row changed.
    async fn revoke_session(&self, token_digest: &[u8]) -> Result<bool, StoreError>;

    /// Revoke every active session the user owns ("log out everywhere").
    /// Returns how many sessions were revoked.
    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Persist a verification-token digest for a user.
    async fn insert_verification_token(
        &self,
        user_id: Uuid,
        token_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<(), StoreError>;

    /// Consume a verification token exactly once: mark it used and flag the
    /// owner's email verified in the same transaction. Returns the owner,
    /// or `None` when the token is absent, already used, or expired.
    async fn consume_verification_token(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<Uuid>, StoreError>;

    /// Load a user, excluding soft-deleted rows.
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError>;
}
