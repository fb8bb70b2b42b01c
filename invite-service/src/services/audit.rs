//! Fire-and-forget audit sink.
//!
//! Records invite lifecycle events outside the operation's transaction; a
//! sink failure is logged and swallowed, never surfaced to the caller.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::models::AuditEvent;

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event. Must not fail the caller: implementations swallow
    /// their own errors.
    async fn record(&self, event: AuditEvent);
}

/// Writes audit rows to Postgres from a spawned task so the primary
/// operation never waits on, or fails with, the sink.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: AuditEvent) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO invite_audit (event_id, action, invite_id, email, role_code,
                                          actor_user_id, client_ip, detail, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id)
            .bind(event.action.as_str())
            .bind(event.invite_id)
            .bind(&event.email)
            .bind(&event.role_code)
            .bind(event.actor_user_id)
            .bind(&event.client_ip)
            .bind(&event.detail)
            .bind(event.created_utc)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(
                    action = event.action.as_str(),
                    error = %e,
                    "Failed to write audit event"
                );
            }
        });
    }
}

/// Test double that collects events in memory.
#[derive(Default)]
pub struct MockAuditSink {
    pub events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<crate::models::AuditAction> {
        self.events
            .lock()
            .map(|e| e.iter().map(|ev| ev.action).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
