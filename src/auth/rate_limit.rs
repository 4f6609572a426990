//! Fixed-window rate limiting against a shared counter store.
//!
//! The window is fixed, not sliding: the TTL is attached by the increment
//! that creates the counter, so a burst of up to twice the limit can span a
//! window boundary. That approximation is accepted and covered by tests.
//!
//! Counter-store failures are fail-closed: they propagate as retryable
//! errors instead of silently allowing the request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Atomic counter collaborator: increment plus TTL attachment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter bound to `key`, returning the new count.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Attach a time-to-live to `key`.
    async fn expire(&self, key: &str, seconds: u64) -> Result<()>;
}

/// Redis-backed counter store (INCR + EXPIRE).
pub struct RedisCounterStore {
    connection_manager: Arc<ConnectionManager>,
}

impl RedisCounterStore {
    /// Connect and verify the counter store is reachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("failed to create counter store client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to counter store")?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("failed to ping counter store")?;

        debug!("connected to counter store");

        Ok(Self {
            connection_manager: Arc::new(connection_manager),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = (*self.connection_manager).clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .context("counter store INCR failed")
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut conn = (*self.connection_manager).clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<i64>(&mut conn)
            .await
            .context("counter store EXPIRE failed")?;
        Ok(())
    }
}

struct CounterEntry {
    count: i64,
    expires_at: Option<Instant>,
}

/// In-process counter store for tests and single-instance deployments.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                entries.remove(key);
            }
        }
        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: None,
        });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub limit: i64,
    pub window_seconds: u64,
}

impl RateLimitQuota {
    #[must_use]
    pub const fn new(limit: i64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
}

/// Quotas per guarded action. Per-identity limits are tighter than
/// per-origin ones.
#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    pub register_ip: RateLimitQuota,
    pub register_email: RateLimitQuota,
    pub login_ip: RateLimitQuota,
    pub refresh_ip: RateLimitQuota,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            register_ip: RateLimitQuota::new(10, 60),
            register_email: RateLimitQuota::new(5, 60),
            login_ip: RateLimitQuota::new(10, 60),
            refresh_ip: RateLimitQuota::new(10, 60),
        }
    }
}

/// Fixed-window limiter over an atomic counter store.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Consume one unit of quota for `key` and report the decision.
    pub async fn check_and_consume(
        &self,
        key: &str,
        quota: RateLimitQuota,
    ) -> Result<RateLimitResult> {
        let count = self.store.increment(key).await?;
        if count == 1 {
            // First increment within a window owns the TTL.
            self.store.expire(key, quota.window_seconds).await?;
        }

        Ok(RateLimitResult {
            allowed: count <= quota.limit,
            remaining: (quota.limit - count).max(0),
            limit: quota.limit,
        })
    }
}

/// Counter key for a per-origin gate.
#[must_use]
pub fn ip_key(action: &str, ip: &str) -> String {
    format!("rl:{action}:ip:{ip}")
}

/// Counter key for a per-identity gate.
#[must_use]
pub fn email_key(action: &str, email: &str) -> String {
    format!("rl:{action}:email:{email}")
}
