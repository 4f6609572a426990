//! In-process auth store for tests and single-process development.
//!
//! Mirrors the Postgres implementation's contracts: the same uniqueness
//! rules, the same revocation/expiry filters, and the same all-or-nothing
//! behavior, with the mutex standing in for transaction atomicity.

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::error::StoreError;

use super::{
    AuthStore, CredentialRecord, RegisteredUser, SessionParams, SessionRecord, UserRecord,
};

#[derive(Clone, Debug)]
struct MemUser {
    id: Uuid,
    email: String,
    is_email_verified: bool,
    created_at_unix: i64,
    deleted_at_unix: Option<i64>,
}

#[derive(Clone, Debug)]
struct MemCredential {
    id: Uuid,
    user_id: Uuid,
    email: String,
    password_hash: Option<String>,
    last_sign_in_at_unix: Option<i64>,
}

#[derive(Clone, Debug)]
struct MemSession {
    id: Uuid,
    user_id: Uuid,
    token_digest: Vec<u8>,
    expires_at_unix: i64,
    revoked_at_unix: Option<i64>,
}

#[derive(Clone, Debug)]
struct MemVerificationToken {
    user_id: Uuid,
    token_digest: Vec<u8>,
    expires_at_unix: i64,
    used_at_unix: Option<i64>,
}

#[derive(Default)]
struct Inner {
    users: Vec<MemUser>,
    credentials: Vec<MemCredential>,
    sessions: Vec<MemSession>,
    verification_tokens: Vec<MemVerificationToken>,
}

#[derive(Default)]
pub struct MemoryAuthStore {
    inner: Mutex<Inner>,
}

impl MemoryAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-deleted users holding the address; lets tests assert
    /// that a failed registration left no orphan behind.
    pub async fn users_with_email(&self, email: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .users
            .iter()
            .filter(|user| user.email == email && user.deleted_at_unix.is_none())
            .count()
    }

    /// Number of usable sessions owned by the user.
    pub async fn active_session_count(&self, user_id: Uuid) -> usize {
        let now = now_unix();
        let inner = self.inner.lock().await;
        inner
            .sessions
            .iter()
            .filter(|session| {
                session.user_id == user_id
                    && session.revoked_at_unix.is_none()
                    && session.expires_at_unix > now
            })
            .count()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

fn session_usable(session: &MemSession, now: i64) -> bool {
    session.revoked_at_unix.is_none() && session.expires_at_unix > now
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn create_user_with_credential(
        &self,
        email: &str,
        password_hash: &str,
        session: SessionParams,
    ) -> Result<RegisteredUser, StoreError> {
        let now = now_unix();
        let mut inner = self.inner.lock().await;

        // The mutex makes the uniqueness check and the three inserts one
        // atomic step, like the Postgres transaction plus unique index.
        if inner
            .credentials
            .iter()
            .any(|credential| credential.email == email)
        {
            return Err(StoreError::Conflict);
        }

        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        inner.users.push(MemUser {
            id: user_id,
            email: email.to_string(),
            is_email_verified: false,
            created_at_unix: now,
            deleted_at_unix: None,
        });
        inner.credentials.push(MemCredential {
            id: Uuid::new_v4(),
            user_id,
            email: email.to_string(),
            password_hash: Some(password_hash.to_string()),
            last_sign_in_at_unix: None,
        });
        inner.sessions.push(MemSession {
            id: session_id,
            user_id,
            token_digest: session.token_digest,
            expires_at_unix: now + session.ttl_seconds,
            revoked_at_unix: None,
        });

        Ok(RegisteredUser {
            user_id,
            session_id,
        })
    }

    async fn find_password_credential(
        &self,
        email: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let credential = inner.credentials.iter().find(|credential| {
            credential.email == email
                && inner
                    .users
                    .iter()
                    .any(|user| user.id == credential.user_id && user.deleted_at_unix.is_none())
        });
        Ok(credential.map(|credential| CredentialRecord {
            id: credential.id,
            user_id: credential.user_id,
            email: credential.email.clone(),
            password_hash: credential.password_hash.clone(),
        }))
    }

    async fn record_sign_in(&self, credential_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(credential) = inner
            .credentials
            .iter_mut()
            .find(|credential| credential.id == credential_id)
        {
            credential.last_sign_in_at_unix = Some(now_unix());
        }
        Ok(())
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        session: SessionParams,
    ) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().await;
        let id = Uuid::new_v4();
        inner.sessions.push(MemSession {
            id,
            user_id,
            token_digest: session.token_digest,
            expires_at_unix: now_unix() + session.ttl_seconds,
            revoked_at_unix: None,
        });
        Ok(id)
    }

    async fn find_active_session(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<SessionRecord>, StoreError> {
        let now = now_unix();
        let inner = self.inner.lock().await;
        let session = inner
            .sessions
            .iter()
            .find(|session| session.token_digest == token_digest && session_usable(session, now));
        Ok(session.map(|session| SessionRecord {
            id: session.id,
            user_id: session.user_id,
            expires_at_unix: session.expires_at_unix,
        }))
    }

    async fn rotate_session(
        &self,
        old_digest: &[u8],
        new_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<Option<Uuid>, StoreError> {
        let now = now_unix();
        let mut inner = self.inner.lock().await;
        let Some(session) = inner
            .sessions
            .iter_mut()
            .find(|session| session.token_digest == old_digest && session_usable(session, now))
        else {
            return Ok(None);
        };
        session.token_digest = new_digest.to_vec();
        session.expires_at_unix = now + ttl_seconds;
        Ok(Some(session.user_id))
    }

    async fn revoke_session(&self, token_digest: &[u8]) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.iter_mut().find(|session| {
            session.token_digest == token_digest && session.revoked_at_unix.is_none()
        }) else {
            return Ok(false);
        };
        session.revoked_at_unix = Some(now_unix());
        Ok(true)
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let now = now_unix();
        let mut inner = self.inner.lock().await;
        let mut revoked = 0u64;
        for session in inner
            .sessions
            .iter_mut()
            .filter(|session| session.user_id == user_id && session.revoked_at_unix.is_none())
        {
            session.revoked_at_unix = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn insert_verification_token(
        &self,
        user_id: Uuid,
        token_digest: &[u8],
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.verification_tokens.push(MemVerificationToken {
            user_id,
            token_digest: token_digest.to_vec(),
            expires_at_unix: now_unix() + ttl_seconds,
            used_at_unix: None,
        });
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_digest: &[u8],
    ) -> Result<Option<Uuid>, StoreError> {
        let now = now_unix();
        let mut inner = self.inner.lock().await;
        let Some(token) = inner.verification_tokens.iter_mut().find(|token| {
            token.token_digest == token_digest
                && token.used_at_unix.is_none()
                && token.expires_at_unix > now
        }) else {
            return Ok(None);
        };
        token.used_at_unix = Some(now);
        let user_id = token.user_id;

        if let Some(user) = inner.users.iter_mut().find(|user| user.id == user_id) {
            user.is_email_verified = true;
        }
        Ok(Some(user_id))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let user = inner
            .users
            .iter()
            .find(|user| user.id == user_id && user.deleted_at_unix.is_none());
        Ok(user.map(|user| UserRecord {
            id: user.id,
            email: user.email.clone(),
            is_email_verified: user.is_email_verified,
            created_at_unix: user.created_at_unix,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(digest: &[u8]) -> SessionParams {
        SessionParams {
            token_digest: digest.to_vec(),
            ttl_seconds: 3600,
            user_agent: None,
            ip: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_without_orphan() -> anyhow::Result<()> {
        let store = MemoryAuthStore::new();
        store
            .create_user_with_credential("a@x.com", "hash", params(b"one"))
            .await?;
        let err = store
            .create_user_with_credential("a@x.com", "hash", params(b"two"))
            .await;
        assert!(matches!(err, Err(StoreError::Conflict)));
        assert_eq!(store.users_with_email("a@x.com").await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_treated_as_absent() -> anyhow::Result<()> {
        let store = MemoryAuthStore::new();
        let registered = store
            .create_user_with_credential(
                "b@x.com",
                "hash",
                SessionParams {
                    token_digest: b"expired".to_vec(),
                    ttl_seconds: -1,
                    user_agent: None,
                    ip: None,
                },
            )
            .await?;
        assert!(store.find_active_session(b"expired").await?.is_none());
        assert!(store
            .rotate_session(b"expired", b"fresh", 3600)
            .await?
            .is_none());
        assert_eq!(store.active_session_count(registered.user_id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_is_conditional_on_the_old_digest() -> anyhow::Result<()> {
        let store = MemoryAuthStore::new();
        let registered = store
            .create_user_with_credential("c@x.com", "hash", params(b"old"))
            .await?;

        let owner = store.rotate_session(b"old", b"new", 3600).await?;
        assert_eq!(owner, Some(registered.user_id));

        // The replaced digest can never match again.
        assert!(store.rotate_session(b"old", b"newer", 3600).await?.is_none());
        assert!(store.find_active_session(b"new").await?.is_some());
        Ok(())
    }
}
