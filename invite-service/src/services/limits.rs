//! Service-level rate limiting and spam guarding.
//!
//! Both components keep fixed-window counters in the shared cache store
//! (Redis in production), so the limits hold across service instances.
//! Counters are deliberately outside any database transaction: an aborted
//! create still consumed an attempt.

use std::sync::Arc;

use super::{CacheStore, ServiceError};

/// Fixed-window request limiter keyed by client IP and by email.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    ip_limit: i64,
    ip_window_seconds: i64,
    email_limit: i64,
    email_window_seconds: i64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CacheStore>,
        ip_limit: u32,
        ip_window_seconds: u64,
        email_limit: u32,
        email_window_seconds: u64,
    ) -> Self {
        Self {
            store,
            ip_limit: ip_limit.max(1) as i64,
            ip_window_seconds: ip_window_seconds.max(1) as i64,
            email_limit: email_limit.max(1) as i64,
            email_window_seconds: email_window_seconds.max(1) as i64,
        }
    }

    /// Count one request from `ip`; fail closed once over the limit.
    pub async fn check_ip(&self, ip: &str) -> Result<(), ServiceError> {
        let key = format!("ratelimit:ip:{}", ip);
        let count = self
            .store
            .incr(&key, self.ip_window_seconds)
            .await
            .map_err(ServiceError::Cache)?;
        if count > self.ip_limit {
            tracing::warn!(ip = %ip, count, "IP rate limit exceeded");
            return Err(ServiceError::RateLimited("this address".to_string()));
        }
        Ok(())
    }

    /// Count one request for `email`; fail closed once over the limit.
    pub async fn check_email(&self, email: &str) -> Result<(), ServiceError> {
        let key = format!("ratelimit:email:{}", email);
        let count = self
            .store
            .incr(&key, self.email_window_seconds)
            .await
            .map_err(ServiceError::Cache)?;
        if count > self.email_limit {
            tracing::warn!(email = %email, count, "Email rate limit exceeded");
            return Err(ServiceError::RateLimited("this email".to_string()));
        }
        Ok(())
    }
}

/// Tracks invite-creation attempts per email over a rolling window.
///
/// `note_attempt` always increments, including on refusals, so the counter
/// saturates instead of resetting under retries.
#[derive(Clone)]
pub struct SpamGuard {
    store: Arc<dyn CacheStore>,
    threshold: i64,
    window_seconds: i64,
}

impl SpamGuard {
    pub fn new(store: Arc<dyn CacheStore>, threshold: u32, window_seconds: u64) -> Self {
        Self {
            store,
            threshold: threshold.max(1) as i64,
            window_seconds: window_seconds.max(1) as i64,
        }
    }

    fn key(email: &str) -> String {
        format!("spam:{}", email)
    }

    /// Record one creation attempt and report whether it crosses the spam
    /// threshold. With the default threshold of 3, attempts 1-3 pass and
    /// attempt 4 onwards is spam.
    pub async fn note_attempt(&self, email: &str) -> Result<bool, ServiceError> {
        let count = self
            .store
            .incr(&Self::key(email), self.window_seconds)
            .await
            .map_err(ServiceError::Cache)?;
        Ok(count > self.threshold)
    }

    /// Read-only probe used on the acceptance path, where the check is
    /// defense in depth and must not consume a creation attempt.
    pub async fn is_spam(&self, email: &str) -> Result<bool, ServiceError> {
        let count = self
            .store
            .get(&Self::key(email))
            .await
            .map_err(ServiceError::Cache)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(count > self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryCache;

    #[tokio::test]
    async fn spam_guard_saturates_at_threshold() {
        let guard = SpamGuard::new(Arc::new(MemoryCache::new()), 3, 86400);
        let email = "new.student@example.com";

        assert!(!guard.note_attempt(email).await.unwrap());
        assert!(!guard.note_attempt(email).await.unwrap());
        assert!(!guard.note_attempt(email).await.unwrap());
        // 4th and later attempts report spam, and keep counting
        assert!(guard.note_attempt(email).await.unwrap());
        assert!(guard.note_attempt(email).await.unwrap());
        assert!(guard.is_spam(email).await.unwrap());
    }

    #[tokio::test]
    async fn spam_guard_probe_does_not_count() {
        let guard = SpamGuard::new(Arc::new(MemoryCache::new()), 3, 86400);
        let email = "probed@example.com";

        for _ in 0..10 {
            assert!(!guard.is_spam(email).await.unwrap());
        }
        assert!(!guard.note_attempt(email).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limiter_fails_closed_per_key() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), 2, 3600, 2, 3600);

        assert!(limiter.check_ip("10.0.0.1").await.is_ok());
        assert!(limiter.check_ip("10.0.0.1").await.is_ok());
        assert!(matches!(
            limiter.check_ip("10.0.0.1").await,
            Err(ServiceError::RateLimited(_))
        ));
        // Other keys are unaffected
        assert!(limiter.check_ip("10.0.0.2").await.is_ok());
        assert!(limiter.check_email("a@b.com").await.is_ok());
    }
}
