//! Invite store adapter.
//!
//! Transactional CRUD over the `invites` relation. State transitions go
//! through `SELECT ... FOR UPDATE` row locks plus conditional updates
//! (`... WHERE state_code = 'pending'`), so two racing transitions on the
//! same invite resolve deterministically: one wins, the other sees zero
//! rows. `MemoryInviteStore` gives tests the same contract without a
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{Invite, InviteRole, InviteState};

/// Filters for the paged listing.
#[derive(Debug, Clone, Default)]
pub struct InviteFilter {
    pub state: Option<InviteState>,
    pub role: Option<InviteRole>,
    pub email: Option<String>,
}

/// Non-transactional reads plus the transaction factory.
#[async_trait]
pub trait InviteStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InviteTx>, ServiceError>;
    async fn get(&self, id: Uuid) -> Result<Option<Invite>, ServiceError>;
    /// All invites for an email, newest first.
    async fn list_by_email(&self, email: &str) -> Result<Vec<Invite>, ServiceError>;
    /// Paged listing with filters; returns the page plus the total count.
    async fn list(
        &self,
        filter: &InviteFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Invite>, i64), ServiceError>;
    async fn health_check(&self) -> Result<(), ServiceError>;
}

/// One open transaction over the invite relation. Dropping without commit
/// rolls back.
#[async_trait]
pub trait InviteTx: Send {
    async fn insert(&mut self, invite: &Invite) -> Result<(), ServiceError>;
    /// Row-locked read; the lock is held until commit/rollback.
    async fn get_for_update(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError>;
    /// Row-locked read of the newest pending invite for an email.
    async fn latest_pending_for_update(&mut self, email: &str)
        -> Result<Option<Invite>, ServiceError>;
    /// Conditional transition to accepted; `None` when the row was no longer
    /// pending at update time.
    async fn mark_accepted(
        &mut self,
        id: Uuid,
        accepted_by: Uuid,
    ) -> Result<Option<Invite>, ServiceError>;
    /// Conditional transition to expired; `None` when not pending.
    async fn mark_expired(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError>;
    /// Conditional expiry extension; `None` when not pending.
    async fn extend_expiry(
        &mut self,
        id: Uuid,
        expiry_utc: DateTime<Utc>,
    ) -> Result<Option<Invite>, ServiceError>;
    /// Row-locked batch of pending invites whose expiry has passed.
    async fn expired_pending_for_update(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invite>, ServiceError>;
    /// Bulk-transition the given ids to expired; returns rows affected.
    async fn expire_many(&mut self, ids: &[Uuid]) -> Result<u64, ServiceError>;
    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
    async fn rollback(self: Box<Self>) -> Result<(), ServiceError>;
}

// ==================== PostgreSQL ====================

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ServiceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending database migrations.
    pub async fn run_migrations(&self) -> Result<(), ServiceError> {
        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Migration failed: {}", e)))?;
        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InviteStore for Database {
    async fn begin(&self) -> Result<Box<dyn InviteTx>, ServiceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgInviteTx { tx }))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        let invite = sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE invite_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invite)
    }

    async fn list_by_email(&self, email: &str) -> Result<Vec<Invite>, ServiceError> {
        let invites = sqlx::query_as::<_, Invite>(
            "SELECT * FROM invites WHERE LOWER(email) = LOWER($1) ORDER BY created_utc DESC",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        Ok(invites)
    }

    async fn list(
        &self,
        filter: &InviteFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Invite>, i64), ServiceError> {
        let limit = limit.clamp(1, 200) as i64;
        let offset = (page.max(1) as i64 - 1) * limit;

        let mut qb = QueryBuilder::new("SELECT * FROM invites");
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_utc DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        let invites = qb.build_query_as::<Invite>().fetch_all(&self.pool).await?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM invites");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok((invites, total))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &InviteFilter) {
    let mut first = true;
    let mut sep = |qb: &mut QueryBuilder<'_, sqlx::Postgres>| {
        qb.push(if std::mem::take(&mut first) {
            " WHERE "
        } else {
            " AND "
        });
    };

    if let Some(state) = filter.state {
        sep(qb);
        qb.push("state_code = ");
        qb.push_bind(state.as_str());
    }
    if let Some(role) = filter.role {
        sep(qb);
        qb.push("role_code = ");
        qb.push_bind(role.as_str());
    }
    if let Some(email) = &filter.email {
        sep(qb);
        qb.push("LOWER(email) = LOWER(");
        qb.push_bind(email.clone());
        qb.push(")");
    }
}

struct PgInviteTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl InviteTx for PgInviteTx {
    async fn insert(&mut self, invite: &Invite) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO invites (invite_id, email, role_code, state_code, invited_by_user_id,
                                 created_utc, updated_utc, expiry_utc, accepted_utc, accepted_by_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(invite.invite_id)
        .bind(&invite.email)
        .bind(&invite.role_code)
        .bind(&invite.state_code)
        .bind(invite.invited_by_user_id)
        .bind(invite.created_utc)
        .bind(invite.updated_utc)
        .bind(invite.expiry_utc)
        .bind(invite.accepted_utc)
        .bind(invite.accepted_by_user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_for_update(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        let invite =
            sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE invite_id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(invite)
    }

    async fn latest_pending_for_update(
        &mut self,
        email: &str,
    ) -> Result<Option<Invite>, ServiceError> {
        let invite = sqlx::query_as::<_, Invite>(
            r#"
            SELECT * FROM invites
            WHERE LOWER(email) = LOWER($1) AND state_code = 'pending'
            ORDER BY created_utc DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invite)
    }

    async fn mark_accepted(
        &mut self,
        id: Uuid,
        accepted_by: Uuid,
    ) -> Result<Option<Invite>, ServiceError> {
        let invite = sqlx::query_as::<_, Invite>(
            r#"
            UPDATE invites
            SET state_code = 'accepted', accepted_utc = NOW(),
                accepted_by_user_id = $2, updated_utc = NOW()
            WHERE invite_id = $1 AND state_code = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(accepted_by)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invite)
    }

    async fn mark_expired(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        let invite = sqlx::query_as::<_, Invite>(
            r#"
            UPDATE invites
            SET state_code = 'expired', updated_utc = NOW()
            WHERE invite_id = $1 AND state_code = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invite)
    }

    async fn extend_expiry(
        &mut self,
        id: Uuid,
        expiry_utc: DateTime<Utc>,
    ) -> Result<Option<Invite>, ServiceError> {
        let invite = sqlx::query_as::<_, Invite>(
            r#"
            UPDATE invites
            SET expiry_utc = $2, updated_utc = NOW()
            WHERE invite_id = $1 AND state_code = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expiry_utc)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invite)
    }

    async fn expired_pending_for_update(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invite>, ServiceError> {
        let invites = sqlx::query_as::<_, Invite>(
            "SELECT * FROM invites WHERE state_code = 'pending' AND expiry_utc < $1 FOR UPDATE",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(invites)
    }

    async fn expire_many(&mut self, ids: &[Uuid]) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE invites
            SET state_code = 'expired', updated_utc = NOW()
            WHERE invite_id = ANY($1) AND state_code = 'pending'
            "#,
        )
        .bind(ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ==================== In-memory (tests) ====================

/// In-memory store for tests. Transactions take the whole-map lock, which
/// is stricter than row locking but preserves the serialization guarantee
/// the orchestrator depends on; rollback restores a snapshot.
#[derive(Clone, Default)]
pub struct MemoryInviteStore {
    state: std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<Uuid, Invite>>>,
}

impl MemoryInviteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InviteStore for MemoryInviteStore {
    async fn begin(&self) -> Result<Box<dyn InviteTx>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryInviteTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        Ok(self.state.lock().await.get(&id).cloned())
    }

    async fn list_by_email(&self, email: &str) -> Result<Vec<Invite>, ServiceError> {
        let email = email.to_lowercase();
        let mut invites: Vec<Invite> = self
            .state
            .lock()
            .await
            .values()
            .filter(|i| i.email.to_lowercase() == email)
            .cloned()
            .collect();
        invites.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invites)
    }

    async fn list(
        &self,
        filter: &InviteFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Invite>, i64), ServiceError> {
        let limit = limit.clamp(1, 200) as usize;
        let offset = (page.max(1) as usize - 1) * limit;

        let mut invites: Vec<Invite> = self
            .state
            .lock()
            .await
            .values()
            .filter(|i| {
                filter.state.map_or(true, |s| i.state_code == s.as_str())
                    && filter.role.map_or(true, |r| i.role_code == r.as_str())
                    && filter
                        .email
                        .as_ref()
                        .map_or(true, |e| i.email.eq_ignore_ascii_case(e))
            })
            .cloned()
            .collect();
        invites.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));

        let total = invites.len() as i64;
        let pageful = invites.into_iter().skip(offset).take(limit).collect();
        Ok((pageful, total))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct MemoryInviteTx {
    guard: tokio::sync::OwnedMutexGuard<std::collections::HashMap<Uuid, Invite>>,
    /// Present until commit; restored on rollback/drop.
    snapshot: Option<std::collections::HashMap<Uuid, Invite>>,
}

impl Drop for MemoryInviteTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl InviteTx for MemoryInviteTx {
    async fn insert(&mut self, invite: &Invite) -> Result<(), ServiceError> {
        self.guard.insert(invite.invite_id, invite.clone());
        Ok(())
    }

    async fn get_for_update(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        Ok(self.guard.get(&id).cloned())
    }

    async fn latest_pending_for_update(
        &mut self,
        email: &str,
    ) -> Result<Option<Invite>, ServiceError> {
        let email = email.to_lowercase();
        Ok(self
            .guard
            .values()
            .filter(|i| {
                i.email.to_lowercase() == email && i.state_code == InviteState::Pending.as_str()
            })
            .max_by_key(|i| i.created_utc)
            .cloned())
    }

    async fn mark_accepted(
        &mut self,
        id: Uuid,
        accepted_by: Uuid,
    ) -> Result<Option<Invite>, ServiceError> {
        match self.guard.get_mut(&id) {
            Some(invite) if invite.state_code == InviteState::Pending.as_str() => {
                invite.state_code = InviteState::Accepted.as_str().to_string();
                invite.accepted_utc = Some(Utc::now());
                invite.accepted_by_user_id = Some(accepted_by);
                invite.updated_utc = Utc::now();
                Ok(Some(invite.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_expired(&mut self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        match self.guard.get_mut(&id) {
            Some(invite) if invite.state_code == InviteState::Pending.as_str() => {
                invite.state_code = InviteState::Expired.as_str().to_string();
                invite.updated_utc = Utc::now();
                Ok(Some(invite.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn extend_expiry(
        &mut self,
        id: Uuid,
        expiry_utc: DateTime<Utc>,
    ) -> Result<Option<Invite>, ServiceError> {
        match self.guard.get_mut(&id) {
            Some(invite) if invite.state_code == InviteState::Pending.as_str() => {
                invite.expiry_utc = expiry_utc;
                invite.updated_utc = Utc::now();
                Ok(Some(invite.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expired_pending_for_update(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invite>, ServiceError> {
        Ok(self
            .guard
            .values()
            .filter(|i| i.state_code == InviteState::Pending.as_str() && i.expiry_utc < now)
            .cloned()
            .collect())
    }

    async fn expire_many(&mut self, ids: &[Uuid]) -> Result<u64, ServiceError> {
        let mut affected = 0;
        for id in ids {
            if let Some(invite) = self.guard.get_mut(id) {
                if invite.state_code == InviteState::Pending.as_str() {
                    invite.state_code = InviteState::Expired.as_str().to_string();
                    invite.updated_utc = Utc::now();
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ServiceError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), ServiceError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InviteRole;

    fn invite(email: &str) -> Invite {
        Invite::new(email.to_string(), InviteRole::Student, Uuid::new_v4(), 7)
    }

    #[tokio::test]
    async fn memory_tx_rolls_back_on_drop() {
        let store = MemoryInviteStore::new();
        let inv = invite("a@b.com");

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert(&inv).await.unwrap();
            // dropped without commit
        }
        assert!(store.get(inv.invite_id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert(&inv).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.get(inv.invite_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn conditional_update_only_applies_to_pending() {
        let store = MemoryInviteStore::new();
        let inv = invite("a@b.com");
        let accepted_by = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert(&inv).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .mark_accepted(inv.invite_id, accepted_by)
            .await
            .unwrap()
            .is_some());
        // second transition sees zero rows
        assert!(tx
            .mark_accepted(inv.invite_id, accepted_by)
            .await
            .unwrap()
            .is_none());
        assert!(tx.mark_expired(inv.invite_id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        let stored = store.get(inv.invite_id).await.unwrap().unwrap();
        assert_eq!(stored.state(), InviteState::Accepted);
        assert_eq!(stored.accepted_by_user_id, Some(accepted_by));
    }

    #[tokio::test]
    async fn latest_pending_picks_newest() {
        let store = MemoryInviteStore::new();
        let mut older = invite("same@b.com");
        older.created_utc = older.created_utc - chrono::Duration::hours(1);
        let newer = invite("same@b.com");

        let mut tx = store.begin().await.unwrap();
        tx.insert(&older).await.unwrap();
        tx.insert(&newer).await.unwrap();
        let found = tx.latest_pending_for_update("SAME@b.com").await.unwrap();
        assert_eq!(found.unwrap().invite_id, newer.invite_id);
        tx.commit().await.unwrap();
    }
}
