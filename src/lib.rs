//! # Portero (Authentication & Session Engine)
//!
//! `portero` is the authentication core for a web product: account
//! registration, credential verification, session lifecycle, and email
//! verification, exposed as a transport-agnostic library with a thin
//! server binary around it.
//!
//! ## Tokens
//!
//! - **Access tokens** are short-lived signed JWTs (`sub` = user id).
//! - **Refresh tokens** are opaque random strings; the database only ever
//!   sees their SHA-256 digest. Refreshing rotates the token atomically,
//!   so a stolen predecessor is dead the moment its successor exists.
//!
//! ## Abuse protection
//!
//! Registration, login, and refresh sit behind fixed-window rate limits
//! keyed per origin, plus a tighter per-email quota on registration.
//! Limiter backend failures fail closed.
//!
//! ## Enumeration safety
//!
//! Login failures are byte-identical whether the email is unknown or the
//! password is wrong, and token failures never reveal whether a token is
//! malformed, forged, expired, or already used.

pub mod auth;
pub mod cli;
pub mod email;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
