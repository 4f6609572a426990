//! Rendered templates for the messages the engine sends.

use anyhow::{Context, Result};
use url::Url;
use uuid::Uuid;

use super::{verification_idempotency_key, EmailJob, EmailKind};

/// Action link for an email verification token. The raw token travels in
/// the fragment so it never reaches frontend server logs.
pub fn build_verify_url(frontend_base_url: &Url, raw_token: &str) -> Result<Url> {
    let mut url = frontend_base_url
        .join("verify-email")
        .context("failed to build verification link")?;
    url.set_fragment(Some(&format!("token={raw_token}")));
    Ok(url)
}

/// Action link for a password reset token.
pub fn build_reset_url(frontend_base_url: &Url, raw_token: &str) -> Result<Url> {
    let mut url = frontend_base_url
        .join("reset-password")
        .context("failed to build reset link")?;
    url.set_fragment(Some(&format!("token={raw_token}")));
    Ok(url)
}

#[must_use]
pub fn verification_email(recipient: &str, user_id: Uuid, verify_url: &Url) -> EmailJob {
    EmailJob {
        kind: EmailKind::VerifyEmail,
        recipient: recipient.to_string(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Welcome! Confirm your email address by opening the link below.\n\n\
             {verify_url}\n\n\
             The link expires in 30 minutes. If you did not create an account, \
             ignore this message."
        ),
        idempotency_key: verification_idempotency_key(user_id),
    }
}

#[must_use]
pub fn reset_password_email(recipient: &str, idempotency_key: String, reset_url: &Url) -> EmailJob {
    EmailJob {
        kind: EmailKind::ResetPassword,
        recipient: recipient.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "A password reset was requested for your account. Open the link \
             below to choose a new password.\n\n\
             {reset_url}\n\n\
             If you did not request this, ignore this message."
        ),
        idempotency_key,
    }
}
