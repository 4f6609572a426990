//! Access token codec and opaque token helpers.
//!
//! Access tokens are short-lived signed JWTs. Refresh and verification
//! tokens are opaque random strings; only their SHA-256 digest is ever
//! stored, so possession of a session can only be proven by presenting a
//! token that hashes to the stored digest.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// Source entropy per token family. Large enough to be unguessable; the
// exact bit count is policy, not contract.
const REFRESH_TOKEN_BYTES: usize = 64;
const VERIFICATION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: Uuid,
    iat: i64,
    exp: i64,
}

/// Signs and parses access tokens with a process-wide secret.
pub struct TokenCodec {
    signing_secret: SecretString,
    access_token_ttl_seconds: i64,
}

impl TokenCodec {
    #[must_use]
    pub fn new(signing_secret: SecretString, access_token_ttl_seconds: i64) -> Self {
        Self {
            signing_secret,
            access_token_ttl_seconds,
        }
    }

    /// Issue a signed access token binding `sub` to the user id.
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String> {
        let now = unix_now()?;
        let claims = AccessClaims {
            sub: user_id,
            iat: now,
            exp: now + self.access_token_ttl_seconds,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.signing_secret.expose_secret().as_bytes()),
        )
        .context("failed to sign access token")
    }

    /// Parse and verify an access token, returning the subject.
    ///
    /// Bad signature, malformed input, and expiry all collapse to `None`;
    /// callers must not be able to distinguish the reasons.
    #[must_use]
    pub fn parse_access_token(&self, token: &str) -> Option<Uuid> {
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.signing_secret.expose_secret().as_bytes()),
            &Validation::default(),
        )
        .ok()
        .map(|data| data.claims.sub)
    }
}

/// Create a new opaque refresh token.
/// The raw value is only returned to the caller; the database stores a hash.
pub fn generate_refresh_token() -> Result<String> {
    random_token(REFRESH_TOKEN_BYTES)
}

/// Create a new opaque verification token for email links.
pub fn generate_verification_token() -> Result<String> {
    random_token(VERIFICATION_TOKEN_BYTES)
}

fn random_token(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// One-way digest of an opaque token; the only form that touches storage.
#[must_use]
pub fn digest(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn unix_now() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?;
    i64::try_from(elapsed.as_secs()).context("system clock out of range")
}
