//! Typed failures for auth flows and the persistence seam.

use thiserror::Error;

/// Failure kinds surfaced by every auth flow.
///
/// The caller layer maps kinds to transport codes with a single exhaustive
/// match; the engine never returns an ambiguous or silent failure.
#[derive(Debug, Error)]
pub enum AuthFlowError {
    /// Malformed input; the caller can correct and retry.
    #[error("{0}")]
    Validation(String),

    /// Duplicate email on register.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or an invalid/expired token. Deliberately
    /// undifferentiated to prevent enumeration attacks.
    #[error("{0}")]
    Auth(String),

    /// A referenced entity is genuinely absent.
    #[error("{0}")]
    NotFound(String),

    /// Rate limit exhausted.
    #[error("{0}")]
    TooManyRequests(String),

    /// Unexpected dependency failure; retryable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Auth,
    NotFound,
    TooManyRequests,
    Internal,
}

impl AuthFlowError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Auth(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TooManyRequests(_) => ErrorKind::TooManyRequests,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Uniform login failure, identical for unknown email and wrong password.
    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::Auth("invalid email or password".to_string())
    }

    /// Uniform token failure, identical for malformed, forged, and expired.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::Auth("invalid or expired token".to_string())
    }
}

/// Failures from the persistence collaborator.
///
/// Unique-constraint violations are the only storage errors the orchestrator
/// translates (to `Conflict`); everything else propagates as internal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violation")]
    Conflict,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for AuthFlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => {
                Self::Conflict("an account with this email already exists".to_string())
            }
            StoreError::Backend(err) => Self::Internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            AuthFlowError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AuthFlowError::Conflict("x".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(AuthFlowError::invalid_credentials().kind(), ErrorKind::Auth);
        assert_eq!(AuthFlowError::invalid_token().kind(), ErrorKind::Auth);
        assert_eq!(
            AuthFlowError::NotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AuthFlowError::TooManyRequests("x".into()).kind(),
            ErrorKind::TooManyRequests
        );
        assert_eq!(
            AuthFlowError::Internal(anyhow!("boom")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn store_conflict_maps_to_conflict() {
        let err: AuthFlowError = StoreError::Conflict.into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn store_backend_maps_to_internal() {
        let err: AuthFlowError = StoreError::Backend(anyhow!("db down")).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn uniform_credential_error_is_stable() {
        // Enumeration safety depends on the two login failure paths
        // producing byte-identical messages.
        assert_eq!(
            AuthFlowError::invalid_credentials().to_string(),
            AuthFlowError::invalid_credentials().to_string()
        );
    }
}
