//! Outbound email collaborator.
//!
//! The engine only builds jobs and hands them to an [`EmailSender`];
//! transport, retries, and delivery tracking belong to the implementation
//! behind the trait. Enqueueing is spawn-and-forget so a slow or broken
//! mailer never delays an auth flow.

pub mod template;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Template family a job was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailKind {
    VerifyEmail,
    ResetPassword,
}

/// A fully rendered message plus the key that deduplicates retries.
#[derive(Clone, Debug)]
pub struct EmailJob {
    pub kind: EmailKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Deterministic per-purpose key so re-enqueueing the same job
    /// (crash, retry) cannot double-send.
    pub idempotency_key: String,
}

/// Deterministic idempotency key for a user's verification email.
#[must_use]
pub fn verification_idempotency_key(user_id: Uuid) -> String {
    format!("email_verify:{user_id}")
}

/// Delivery seam for rendered email jobs.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, job: EmailJob) -> anyhow::Result<()>;
}

/// Sender that logs instead of delivering. Default for development and
/// tests; deployments plug a real transport behind the trait.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, job: EmailJob) -> anyhow::Result<()> {
        info!(
            kind = ?job.kind,
            recipient = %job.recipient,
            subject = %job.subject,
            idempotency_key = %job.idempotency_key,
            "email send skipped, log sender active"
        );
        Ok(())
    }
}

/// Hand a job to the sender without awaiting delivery. Failures are logged,
/// never propagated; auth flows must not fail on mailer trouble.
pub fn enqueue(sender: Arc<dyn EmailSender>, job: EmailJob) {
    tokio::spawn(async move {
        let key = job.idempotency_key.clone();
        if let Err(err) = sender.send(job).await {
            error!(idempotency_key = %key, "failed to enqueue email: {err:#}");
        }
    });
}
