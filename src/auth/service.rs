//! Auth flow orchestrator.
//!
//! Every flow returns a typed result; there is no ambiguous or falsy
//! failure path. Collaborators arrive by injection so the flows run
//! unchanged against Postgres/Redis or the in-process doubles.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::email::{self, template, EmailSender};

use super::config::{AuthConfig, MIN_PASSWORD_LENGTH};
use super::error::AuthFlowError;
use super::rate_limit::{email_key, ip_key, FixedWindowLimiter};
use super::store::{AuthStore, SessionParams};
use super::tokens::{self, TokenCodec};
use super::types::{IssuedSession, LoginInput, RegisterInput, RequestContext, UserProfile};
use super::utils::{normalize_email, valid_email};
use super::{password, store::RegisteredUser};

pub struct AuthService {
    store: Arc<dyn AuthStore>,
    limiter: FixedWindowLimiter,
    mailer: Arc<dyn EmailSender>,
    codec: TokenCodec,
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthStore>,
        limiter: FixedWindowLimiter,
        mailer: Arc<dyn EmailSender>,
        config: AuthConfig,
    ) -> Self {
        let codec = TokenCodec::new(
            config.jwt_secret().clone(),
            config.access_token_ttl_seconds(),
        );
        Self {
            store,
            limiter,
            mailer,
            codec,
            config,
        }
    }

    /// Create an account and its first session.
    ///
    /// Order matters: shape validation, then rate limits, then the
    /// transactional insert. A duplicate email surfaces as `Conflict` and
    /// leaves nothing behind.
    pub async fn register(
        &self,
        input: RegisterInput,
        ctx: &RequestContext,
    ) -> Result<IssuedSession, AuthFlowError> {
        let email = normalize_email(&input.email);
        if !valid_email(&email) {
            return Err(AuthFlowError::Validation(
                "invalid email address".to_string(),
            ));
        }
        if input.password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthFlowError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        self.guard_register(&email, ctx).await?;

        let password_hash = password::hash_password(&input.password)?;
        let refresh_token = tokens::generate_refresh_token()?;

        let registered = self
            .store
            .create_user_with_credential(
                &email,
                &password_hash,
                self.session_params(&refresh_token, ctx),
            )
            .await?;

        let access_token = self.codec.issue_access_token(registered.user_id)?;
        self.start_email_verification(&email, registered).await?;

        info!(user_id = %registered.user_id, "user registered");

        Ok(IssuedSession {
            user_id: registered.user_id,
            access_token,
            refresh_token,
        })
    }

    /// Exchange credentials for a fresh session.
    ///
    /// Unknown email, passwordless credential, and wrong password all
    /// produce one byte-identical error.
    pub async fn login(
        &self,
        input: LoginInput,
        ctx: &RequestContext,
    ) -> Result<IssuedSession, AuthFlowError> {
        let quota = self.config.rate_limits().login_ip;
        let decision = self
            .limiter
            .check_and_consume(&ip_key("login", origin(ctx)), quota)
            .await?;
        if !decision.allowed {
            return Err(AuthFlowError::TooManyRequests(
                "too many login attempts, try again later".to_string(),
            ));
        }

        let email = normalize_email(&input.email);
        let credential = self
            .store
            .find_password_credential(&email)
            .await?
            .ok_or_else(AuthFlowError::invalid_credentials)?;

        let Some(password_hash) = credential.password_hash.as_deref() else {
            return Err(AuthFlowError::invalid_credentials());
        };
        if !password::verify_password(&input.password, password_hash) {
            return Err(AuthFlowError::invalid_credentials());
        }

        self.store.record_sign_in(credential.id).await?;
        debug!(user_id = %credential.user_id, "credentials verified");

        self.issue_session(credential.user_id, ctx).await
    }

    /// Rotate a refresh token and mint a new access token.
    ///
    /// Rotation is one conditional update in the store, so two concurrent
    /// refreshes with the same token cannot both succeed, and the old
    /// token is dead the moment the new one exists.
    pub async fn refresh(
        &self,
        raw_refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<IssuedSession, AuthFlowError> {
        let quota = self.config.rate_limits().refresh_ip;
        let decision = self
            .limiter
            .check_and_consume(&ip_key("refresh", origin(ctx)), quota)
            .await?;
        if !decision.allowed {
            return Err(AuthFlowError::TooManyRequests(
                "too many refresh attempts, try again later".to_string(),
            ));
        }

        let next_token = tokens::generate_refresh_token()?;
        let user_id = self
            .store
            .rotate_session(
                &tokens::digest(raw_refresh_token),
                &tokens::digest(&next_token),
                self.config.session_ttl_seconds(),
            )
            .await?
            .ok_or_else(AuthFlowError::invalid_token)?;

        let access_token = self.codec.issue_access_token(user_id)?;

        Ok(IssuedSession {
            user_id,
            access_token,
            refresh_token: next_token,
        })
    }

    /// Revoke the presented session, or every session its owner holds.
    ///
    /// Idempotent: a token that matches nothing is a successful no-op, so
    /// clients can always log out without first checking session state.
    pub async fn logout(&self, raw_refresh_token: &str, all: bool) -> Result<(), AuthFlowError> {
        let digest = tokens::digest(raw_refresh_token);

        if all {
            let Some(session) = self.store.find_active_session(&digest).await? else {
                return Ok(());
            };
            let revoked = self.store.revoke_all_sessions(session.user_id).await?;
            info!(user_id = %session.user_id, revoked, "revoked all sessions");
            return Ok(());
        }

        if !self.store.revoke_session(&digest).await? {
            debug!("logout matched no active session");
        }
        Ok(())
    }

    /// Consume an email verification token.
    ///
    /// Absent, expired, and already-used tokens collapse into one uniform
    /// failure; a token verifies at most once.
    pub async fn verify_email(&self, raw_token: &str) -> Result<Uuid, AuthFlowError> {
        let user_id = self
            .store
            .consume_verification_token(&tokens::digest(raw_token))
            .await?
            .ok_or_else(AuthFlowError::invalid_token)?;

        info!(user_id = %user_id, "email verified");
        Ok(user_id)
    }

    /// Resolve an access token to its owner's profile.
    pub async fn me(&self, access_token: &str) -> Result<UserProfile, AuthFlowError> {
        let user_id = self
            .codec
            .parse_access_token(access_token)
            .ok_or_else(AuthFlowError::invalid_token)?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AuthFlowError::NotFound("user not found".to_string()))?;

        Ok(UserProfile {
            id: user.id,
            email: user.email,
            is_email_verified: user.is_email_verified,
            created_at_unix: user.created_at_unix,
        })
    }

    /// Registration gates: a per-origin quota, then a tighter per-email
    /// quota whose exhaustion asks for a captcha proof.
    async fn guard_register(
        &self,
        email: &str,
        ctx: &RequestContext,
    ) -> Result<(), AuthFlowError> {
        let limits = self.config.rate_limits();

        let by_ip = self
            .limiter
            .check_and_consume(&ip_key("register", origin(ctx)), limits.register_ip)
            .await?;
        if !by_ip.allowed {
            return Err(AuthFlowError::TooManyRequests(
                "too many registrations, try again later".to_string(),
            ));
        }

        let by_email = self
            .limiter
            .check_and_consume(&email_key("register", email), limits.register_email)
            .await?;
        if !by_email.allowed {
            // The captcha escape hatch exists in the flow, but no verifier
            // is wired yet, so a presented proof is still rejected.
            if ctx.captcha_token.is_none() {
                return Err(AuthFlowError::TooManyRequests(
                    "captcha required to continue registration".to_string(),
                ));
            }
            return Err(AuthFlowError::Validation(
                "captcha verification is not available".to_string(),
            ));
        }

        Ok(())
    }

    /// Mint a refresh token, persist its session, and sign an access token.
    async fn issue_session(
        &self,
        user_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<IssuedSession, AuthFlowError> {
        let refresh_token = tokens::generate_refresh_token()?;
        self.store
            .insert_session(user_id, self.session_params(&refresh_token, ctx))
            .await?;
        let access_token = self.codec.issue_access_token(user_id)?;

        Ok(IssuedSession {
            user_id,
            access_token,
            refresh_token,
        })
    }

    /// Persist a verification token and hand the email off without
    /// awaiting delivery.
    async fn start_email_verification(
        &self,
        email: &str,
        registered: RegisteredUser,
    ) -> Result<(), AuthFlowError> {
        let raw = tokens::generate_verification_token()?;
        self.store
            .insert_verification_token(
                registered.user_id,
                &tokens::digest(&raw),
                self.config.verification_ttl_seconds(),
            )
            .await?;

        match template::build_verify_url(self.config.frontend_base_url(), &raw) {
            Ok(url) => email::enqueue(
                self.mailer.clone(),
                template::verification_email(email, registered.user_id, &url),
            ),
            // The account exists and the token is stored; a bad link is a
            // deliverability problem, not a registration failure.
            Err(err) => warn!(user_id = %registered.user_id, "skipping verification email: {err:#}"),
        }
        Ok(())
    }

    fn session_params(&self, refresh_token: &str, ctx: &RequestContext) -> SessionParams {
        SessionParams {
            token_digest: tokens::digest(refresh_token),
            ttl_seconds: self.config.session_ttl_seconds(),
            user_agent: ctx.user_agent.clone(),
            ip: ctx.ip.clone(),
        }
    }
}

fn origin(ctx: &RequestContext) -> &str {
    ctx.ip.as_deref().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::ErrorKind;
    use crate::auth::rate_limit::{MemoryCounterStore, RateLimitQuota, RateLimits};
    use crate::auth::store::MemoryAuthStore;
    use crate::auth::types::ClientType;
    use crate::email::EmailJob;
    use anyhow::Result;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct RecordingSender {
        jobs: Mutex<Vec<EmailJob>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, job: EmailJob) -> Result<()> {
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }
    }

    struct Harness {
        service: AuthService,
        store: Arc<MemoryAuthStore>,
        mailer: Arc<RecordingSender>,
    }

    fn harness() -> Result<Harness> {
        let store = Arc::new(MemoryAuthStore::new());
        let mailer = Arc::new(RecordingSender::default());
        let config = AuthConfig::new(
            SecretString::from("test-signing-secret"),
            Url::parse("https://app.example.com")?,
        );
        let service = AuthService::new(
            store.clone(),
            FixedWindowLimiter::new(Arc::new(MemoryCounterStore::new())),
            mailer.clone(),
            config,
        );
        Ok(Harness {
            service,
            store,
            mailer,
        })
    }

    fn register_input(email: &str) -> RegisterInput {
        RegisterInput {
            email: email.to_string(),
            password: "longenough1".to_string(),
            client_type: ClientType::Web,
        }
    }

    fn login_input(email: &str, password: &str) -> LoginInput {
        LoginInput {
            email: email.to_string(),
            password: password.to_string(),
            client_type: ClientType::Web,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("test-agent".to_string()),
            captcha_token: None,
        }
    }

    async fn verification_token(mailer: &RecordingSender) -> String {
        // enqueue spawns onto the current-thread runtime; yielding lets
        // the delivery task run.
        tokio::task::yield_now().await;
        let jobs = mailer.jobs.lock().unwrap();
        let body = &jobs.last().expect("verification email enqueued").body;
        body.split("#token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .expect("verification link carries a token")
            .to_string()
    }

    #[tokio::test]
    async fn register_issues_usable_tokens() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;

        assert_ne!(issued.user_id, Uuid::nil());
        assert_eq!(
            h.service.codec.parse_access_token(&issued.access_token),
            Some(issued.user_id)
        );
        assert_eq!(h.store.active_session_count(issued.user_id).await, 1);
        assert!(h
            .store
            .find_active_session(&tokens::digest(&issued.refresh_token))
            .await?
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_malformed_input() -> Result<()> {
        let h = harness()?;

        let err = h
            .service
            .register(register_input("not-an-email"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut short = register_input("a@x.com");
        short.password = "short".to_string();
        let err = h.service.register(short, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts_without_orphan() -> Result<()> {
        let h = harness()?;
        h.service.register(register_input("a@x.com"), &ctx()).await?;

        let err = h
            .service
            .register(register_input("A@X.COM "), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.store.users_with_email("a@x.com").await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn register_enqueues_verification_email_with_stable_key() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;

        tokio::task::yield_now().await;
        let jobs = h.mailer.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].recipient, "a@x.com");
        assert_eq!(
            jobs[0].idempotency_key,
            format!("email_verify:{}", issued.user_id)
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_failures_are_byte_identical() -> Result<()> {
        let h = harness()?;
        h.service.register(register_input("a@x.com"), &ctx()).await?;

        let wrong_password = h
            .service
            .login(login_input("a@x.com", "wrongpassword"), &ctx())
            .await
            .unwrap_err();
        let unknown_email = h
            .service
            .login(login_input("nobody@x.com", "longenough1"), &ctx())
            .await
            .unwrap_err();

        assert_eq!(wrong_password.kind(), ErrorKind::Auth);
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        Ok(())
    }

    #[tokio::test]
    async fn login_issues_a_second_session() -> Result<()> {
        let h = harness()?;
        let registered = h.service.register(register_input("a@x.com"), &ctx()).await?;

        let issued = h
            .service
            .login(login_input("a@x.com", "longenough1"), &ctx())
            .await?;
        assert_eq!(issued.user_id, registered.user_id);
        assert_eq!(h.store.active_session_count(issued.user_id).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_kills_the_predecessor() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;

        let rotated = h.service.refresh(&issued.refresh_token, &ctx()).await?;
        assert_eq!(rotated.user_id, issued.user_id);
        assert_ne!(rotated.refresh_token, issued.refresh_token);

        let replayed = h
            .service
            .refresh(&issued.refresh_token, &ctx())
            .await
            .unwrap_err();
        assert_eq!(replayed.kind(), ErrorKind::Auth);

        // The successor keeps working.
        h.service.refresh(&rotated.refresh_token, &ctx()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_idempotent() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;

        h.service.logout(&issued.refresh_token, false).await?;
        assert!(h
            .service
            .refresh(&issued.refresh_token, &ctx())
            .await
            .is_err());

        // Second logout with the same token is a successful no-op, as is
        // logging out a token that never existed.
        h.service.logout(&issued.refresh_token, false).await?;
        h.service.logout("never-issued", true).await?;
        Ok(())
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() -> Result<()> {
        let h = harness()?;
        let first = h.service.register(register_input("a@x.com"), &ctx()).await?;
        let second = h
            .service
            .login(login_input("a@x.com", "longenough1"), &ctx())
            .await?;
        let third = h
            .service
            .login(login_input("a@x.com", "longenough1"), &ctx())
            .await?;
        assert_eq!(h.store.active_session_count(first.user_id).await, 3);

        h.service.logout(&second.refresh_token, true).await?;

        for token in [
            &first.refresh_token,
            &second.refresh_token,
            &third.refresh_token,
        ] {
            let err = h.service.refresh(token, &ctx()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Auth);
        }
        assert_eq!(h.store.active_session_count(first.user_id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn verification_token_is_single_use() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;
        let raw = verification_token(&h.mailer).await;

        assert_eq!(h.service.verify_email(&raw).await?, issued.user_id);
        let profile = h.service.me(&issued.access_token).await?;
        assert!(profile.is_email_verified);

        let replayed = h.service.verify_email(&raw).await.unwrap_err();
        assert_eq!(replayed.kind(), ErrorKind::Auth);
        Ok(())
    }

    #[tokio::test]
    async fn me_resolves_token_owner() -> Result<()> {
        let h = harness()?;
        let issued = h.service.register(register_input("a@x.com"), &ctx()).await?;

        let profile = h.service.me(&issued.access_token).await?;
        assert_eq!(profile.id, issued.user_id);
        assert_eq!(profile.email, "a@x.com");
        assert!(!profile.is_email_verified);

        let err = h.service.me("garbage").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        Ok(())
    }

    #[tokio::test]
    async fn login_quota_denies_the_eleventh_attempt() -> Result<()> {
        let h = harness()?;
        h.service.register(register_input("a@x.com"), &ctx()).await?;

        for _ in 0..10 {
            let err = h
                .service
                .login(login_input("a@x.com", "wrongpassword"), &ctx())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Auth);
        }

        let err = h
            .service
            .login(login_input("a@x.com", "longenough1"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyRequests);
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_email_quota_asks_for_captcha() -> Result<()> {
        let h = harness()?;
        // Loosen the per-IP gate so the per-email quota is the one that
        // trips.
        let config = AuthConfig::new(
            SecretString::from("test-signing-secret"),
            Url::parse("https://app.example.com")?,
        )
        .with_rate_limits(RateLimits {
            register_ip: RateLimitQuota::new(100, 60),
            ..RateLimits::default()
        });
        let service = AuthService::new(
            h.store.clone(),
            FixedWindowLimiter::new(Arc::new(MemoryCounterStore::new())),
            h.mailer.clone(),
            config,
        );

        service.register(register_input("a@x.com"), &ctx()).await?;
        for _ in 0..4 {
            let err = service
                .register(register_input("a@x.com"), &ctx())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Conflict);
        }

        let err = service
            .register(register_input("a@x.com"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyRequests);
        assert!(err.to_string().contains("captcha"));

        let mut with_proof = ctx();
        with_proof.captcha_token = Some("proof".to_string());
        let err = service
            .register(register_input("a@x.com"), &with_proof)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        Ok(())
    }
}
