//! Test helper module for invite-service integration tests.
//!
//! Builds the invite service over the in-memory store, cache, and mail/audit
//! doubles, so the lifecycle tests exercise the real orchestration logic
//! without external infrastructure.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use invite_service::services::{
    DomainPolicy, InviteCache, InviteService, InviteSettings, InviteTokenService, MemoryCache,
    MemoryInviteStore, MockAuditSink, MockEmailService, RateLimiter, SpamGuard,
};

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub struct HarnessOptions {
    pub allowed_domains: Vec<String>,
    pub ip_limit: u32,
    pub email_limit: u32,
    pub spam_threshold: u32,
    pub invite_ttl_days: i64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            allowed_domains: vec!["school.edu".to_string()],
            ip_limit: 1000,
            email_limit: 1000,
            spam_threshold: 3,
            invite_ttl_days: 7,
        }
    }
}

pub struct TestHarness {
    pub service: InviteService,
    pub store: Arc<MemoryInviteStore>,
    pub cache_store: Arc<MemoryCache>,
    pub email: Arc<MockEmailService>,
    pub audit: Arc<MockAuditSink>,
    pub tokens: InviteTokenService,
}

pub fn harness() -> TestHarness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> TestHarness {
    let store = Arc::new(MemoryInviteStore::new());
    let cache_store = Arc::new(MemoryCache::new());
    let email = Arc::new(MockEmailService::new());
    let audit = Arc::new(MockAuditSink::new());
    let tokens = InviteTokenService::new(TEST_SECRET);

    let service = InviteService::new(
        store.clone(),
        InviteCache::new(cache_store.clone(), 3600),
        tokens.clone(),
        email.clone(),
        DomainPolicy::new(options.allowed_domains),
        RateLimiter::new(
            cache_store.clone(),
            options.ip_limit,
            3600,
            options.email_limit,
            3600,
        ),
        SpamGuard::new(cache_store.clone(), options.spam_threshold, 86400),
        audit.clone(),
        InviteSettings {
            invite_ttl_days: options.invite_ttl_days,
            frontend_base_url: "http://localhost:3000".to_string(),
            tx_timeout: Duration::from_secs(5),
        },
    );

    TestHarness {
        service,
        store,
        cache_store,
        email,
        audit,
        tokens,
    }
}
