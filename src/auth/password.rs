//! Password hashing and verification (Argon2id).

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a plaintext password with Argon2id and a fresh random salt.
/// Cost parameters are the crate defaults, fixed process-wide.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}

/// Verify a plaintext password against a stored hash.
/// Comparison semantics are inherited from the hashing primitive; a
/// malformed stored hash verifies as false rather than erroring.
#[must_use]
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() -> Result<()> {
        let hash = hash_password("longenough1")?;
        assert!(verify_password("longenough1", &hash));
        assert!(!verify_password("longenough2", &hash));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        let first = hash_password("longenough1")?;
        let second = hash_password("longenough1")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("longenough1", "not-a-phc-string"));
    }
}
