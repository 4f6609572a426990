//! Engine configuration.

use secrecy::SecretString;
use url::Url;

use super::rate_limit::RateLimits;

/// Access tokens are short-lived; refresh does the long-haul work.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
/// Sessions (refresh tokens) live for 30 days unless rotated or revoked.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Email verification links stay valid for 30 minutes.
pub const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 30 * 60;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Tunables for the auth engine, built with `with_*` methods.
#[derive(Clone)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    frontend_base_url: Url,
    access_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    rate_limits: RateLimits,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString, frontend_base_url: Url) -> Self {
        Self {
            jwt_secret,
            frontend_base_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            rate_limits: RateLimits::default(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &Url {
        &self.frontend_base_url
    }

    #[must_use]
    pub const fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub const fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }

    #[must_use]
    pub const fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }
}
