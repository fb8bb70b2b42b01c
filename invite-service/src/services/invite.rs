//! Invite service orchestrator.
//!
//! Composes the policy gates, token codec, store, cache, and email sender
//! into the invite lifecycle: create, validate, accept, resend, cancel and
//! cleanup. All store mutations run inside a transaction bounded by a
//! timeout; the row is the source of truth and every transition re-reads it
//! under a `FOR UPDATE` lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{
    AuditSink, DomainPolicy, EmailProvider, InviteCache, InviteClaims, InviteFilter, InviteStore,
    InviteTokenService, InviteTx, RateLimiter, ServiceError, SpamGuard,
};
use crate::models::{AuditAction, AuditEvent, Invite, InviteRole, InviteState};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct InviteSettings {
    /// Lifetime of a fresh or resent invite.
    pub invite_ttl_days: i64,
    /// Base URL the emailed signup link points at.
    pub frontend_base_url: String,
    /// Upper bound for one transactional operation; on expiry the
    /// transaction rolls back and the caller may retry.
    pub tx_timeout: Duration,
}

/// Public claims returned by token validation. No state is mutated.
#[derive(Debug, Clone, Serialize)]
pub struct InvitePreview {
    pub invite_id: Uuid,
    pub email: String,
    pub role: InviteRole,
    pub expiry_utc: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct InviteService {
    store: Arc<dyn InviteStore>,
    cache: InviteCache,
    tokens: InviteTokenService,
    email: Arc<dyn EmailProvider>,
    policy: DomainPolicy,
    limiter: RateLimiter,
    spam: SpamGuard,
    audit: Arc<dyn AuditSink>,
    settings: InviteSettings,
}

impl InviteService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn InviteStore>,
        cache: InviteCache,
        tokens: InviteTokenService,
        email: Arc<dyn EmailProvider>,
        policy: DomainPolicy,
        limiter: RateLimiter,
        spam: SpamGuard,
        audit: Arc<dyn AuditSink>,
        settings: InviteSettings,
    ) -> Self {
        Self {
            store,
            cache,
            tokens,
            email,
            policy,
            limiter,
            spam,
            audit,
            settings,
        }
    }

    /// Create a pending invite and email its signup link.
    ///
    /// The invite is not durable until the relay accepts the mail: a send
    /// failure rolls the insert back. Limiter and spam counters are outside
    /// the transaction on purpose, so an aborted create still consumed an
    /// attempt.
    #[tracing::instrument(skip(self), fields(role = role.as_str()))]
    pub async fn create(
        &self,
        email: &str,
        role: InviteRole,
        invited_by: Uuid,
        client_ip: &str,
    ) -> Result<Invite, ServiceError> {
        let email = DomainPolicy::normalize_email(email)?;

        if let Err(e) = self.limiter.check_ip(client_ip).await {
            return self
                .refuse(e, None, Some(&email), Some(role.as_str()), invited_by, Some(client_ip))
                .await;
        }
        if let Err(e) = self.limiter.check_email(&email).await {
            return self
                .refuse(e, None, Some(&email), Some(role.as_str()), invited_by, Some(client_ip))
                .await;
        }
        if let Err(e) = self.policy.validate(&email, role) {
            return self
                .refuse(e, None, Some(&email), Some(role.as_str()), invited_by, Some(client_ip))
                .await;
        }
        if self.spam.note_attempt(&email).await? {
            return self
                .refuse(
                    ServiceError::SpamDetected,
                    None,
                    Some(&email),
                    Some(role.as_str()),
                    invited_by,
                    Some(client_ip),
                )
                .await;
        }

        let invite = Invite::new(email.clone(), role, invited_by, self.settings.invite_ttl_days);

        let mut tx = self.bounded(self.store.begin()).await?;
        let outcome = self
            .bounded(self.deliver_in_tx(tx.as_mut(), &invite))
            .await;
        match outcome {
            Ok(()) => {
                if let Err(e) = self.cache.put(&invite).await {
                    tracing::warn!(invite_id = %invite.invite_id, error = %e, "Failed to cache invite");
                }
                self.bounded(tx.commit()).await?;
            }
            Err(e) => {
                let _ = tx.rollback().await;
                tracing::warn!(email = %invite.email, error = %e, "Invite creation aborted");
                return self
                    .refuse(
                        e,
                        Some(invite.invite_id),
                        Some(&invite.email),
                        Some(role.as_str()),
                        invited_by,
                        Some(client_ip),
                    )
                    .await;
            }
        }

        tracing::info!(invite_id = %invite.invite_id, "Invite created");
        self.audit
            .record(AuditEvent::new(
                AuditAction::InviteCreated,
                Some(invite.invite_id),
                Some(invite.email.clone()),
                Some(invite.role_code.clone()),
                Some(invited_by),
                Some(client_ip.to_string()),
                None,
            ))
            .await;

        Ok(invite)
    }

    async fn deliver_in_tx(
        &self,
        tx: &mut dyn InviteTx,
        invite: &Invite,
    ) -> Result<(), ServiceError> {
        tx.insert(invite).await?;
        let token = self.tokens.encode(invite)?;
        self.email
            .send_invite_email(
                &invite.email,
                invite.role().unwrap_or(InviteRole::Student),
                &token,
                &self.settings.frontend_base_url,
            )
            .await
    }

    /// Decode a token and check it against the authoritative record without
    /// mutating anything.
    #[tracing::instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<InvitePreview, ServiceError> {
        let claims = self.tokens.decode(token)?;

        let invite = self
            .get(claims.sub)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

        match invite.state() {
            InviteState::Pending => {}
            InviteState::Accepted => return Err(ServiceError::AlreadyAccepted),
            InviteState::Expired => return Err(ServiceError::InviteExpired),
        }
        // Time may have advanced past the stored expiry since issuance
        if invite.is_expired_by_time() {
            return Err(ServiceError::InviteExpired);
        }
        if claims.email != invite.email {
            return Err(ServiceError::EmailMismatch);
        }
        if Some(claims.role) != invite.role() {
            return Err(ServiceError::RoleMismatch);
        }

        Ok(InvitePreview {
            invite_id: invite.invite_id,
            email: invite.email.clone(),
            role: claims.role,
            expiry_utc: invite.expiry_utc,
        })
    }

    /// Accept by bearer token: decode, then run the locked transition.
    pub async fn accept_with_token(
        &self,
        token: &str,
        accepted_by: Uuid,
    ) -> Result<Invite, ServiceError> {
        let claims = self.tokens.decode(token)?;
        self.accept(claims, accepted_by).await
    }

    /// Accept an invite. All checks re-run against the row under a
    /// `FOR UPDATE` lock; concurrent accepts of the same invite resolve to
    /// exactly one winner.
    #[tracing::instrument(skip(self, claims), fields(invite_id = %claims.sub))]
    pub async fn accept(
        &self,
        claims: InviteClaims,
        accepted_by: Uuid,
    ) -> Result<Invite, ServiceError> {
        let mut tx = self.bounded(self.store.begin()).await?;
        let outcome = self
            .bounded(self.accept_in_tx(tx.as_mut(), &claims, accepted_by))
            .await;

        match outcome {
            Ok(invite) => {
                if let Err(e) = self.cache.del(invite.invite_id).await {
                    tracing::warn!(invite_id = %invite.invite_id, error = %e, "Failed to invalidate cache");
                }
                self.bounded(tx.commit()).await?;

                tracing::info!(invite_id = %invite.invite_id, "Invite accepted");
                self.audit
                    .record(AuditEvent::new(
                        AuditAction::InviteAccepted,
                        Some(invite.invite_id),
                        Some(invite.email.clone()),
                        Some(invite.role_code.clone()),
                        Some(accepted_by),
                        None,
                        None,
                    ))
                    .await;
                Ok(invite)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                self.refuse(
                    e,
                    Some(claims.sub),
                    Some(&claims.email),
                    Some(claims.role.as_str()),
                    accepted_by,
                    None,
                )
                .await
            }
        }
    }

    async fn accept_in_tx(
        &self,
        tx: &mut dyn InviteTx,
        claims: &InviteClaims,
        accepted_by: Uuid,
    ) -> Result<Invite, ServiceError> {
        let invite = tx
            .get_for_update(claims.sub)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

        match invite.state() {
            InviteState::Pending => {}
            InviteState::Accepted => return Err(ServiceError::AlreadyUsed),
            InviteState::Expired => return Err(ServiceError::InviteExpired),
        }
        if invite.is_expired_by_time() {
            return Err(ServiceError::InviteExpired);
        }
        if claims.email != invite.email {
            return Err(ServiceError::EmailMismatch);
        }
        if Some(claims.role) != invite.role() {
            return Err(ServiceError::RoleMismatch);
        }

        // Defense in depth: policy may have changed since issuance, and a
        // spam-flagged address must not ride in on an old token.
        let role = invite
            .role()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("invite has unknown role")))?;
        self.policy.validate(&invite.email, role)?;
        if self.spam.is_spam(&invite.email).await? {
            return Err(ServiceError::SpamDetected);
        }

        // Another transaction may have won between our read and this update
        tx.mark_accepted(invite.invite_id, accepted_by)
            .await?
            .ok_or(ServiceError::AlreadyUsed)
    }

    /// Extend the newest pending invite for an email and re-send its link.
    #[tracing::instrument(skip(self))]
    pub async fn resend(
        &self,
        email: &str,
        invited_by: Uuid,
        client_ip: &str,
    ) -> Result<Invite, ServiceError> {
        let email = DomainPolicy::normalize_email(email)?;

        if let Err(e) = self.limiter.check_ip(client_ip).await {
            return self
                .refuse(e, None, Some(&email), None, invited_by, Some(client_ip))
                .await;
        }
        if let Err(e) = self.limiter.check_email(&email).await {
            return self
                .refuse(e, None, Some(&email), None, invited_by, Some(client_ip))
                .await;
        }
        if self.spam.note_attempt(&email).await? {
            return self
                .refuse(
                    ServiceError::SpamDetected,
                    None,
                    Some(&email),
                    None,
                    invited_by,
                    Some(client_ip),
                )
                .await;
        }

        let mut tx = self.bounded(self.store.begin()).await?;
        let outcome = self.bounded(self.resend_in_tx(tx.as_mut(), &email)).await;

        match outcome {
            Ok(invite) => {
                if let Err(e) = self.cache.put(&invite).await {
                    tracing::warn!(invite_id = %invite.invite_id, error = %e, "Failed to refresh cache");
                }
                self.bounded(tx.commit()).await?;

                tracing::info!(invite_id = %invite.invite_id, "Invite resent");
                self.audit
                    .record(AuditEvent::new(
                        AuditAction::InviteResent,
                        Some(invite.invite_id),
                        Some(invite.email.clone()),
                        Some(invite.role_code.clone()),
                        Some(invited_by),
                        Some(client_ip.to_string()),
                        None,
                    ))
                    .await;
                Ok(invite)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                self.refuse(e, None, Some(&email), None, invited_by, Some(client_ip))
                    .await
            }
        }
    }

    async fn resend_in_tx(
        &self,
        tx: &mut dyn InviteTx,
        email: &str,
    ) -> Result<Invite, ServiceError> {
        let pending = tx
            .latest_pending_for_update(email)
            .await?
            .ok_or(ServiceError::NoPendingInvite)?;

        let new_expiry = Utc::now() + chrono::Duration::days(self.settings.invite_ttl_days);
        let invite = tx
            .extend_expiry(pending.invite_id, new_expiry)
            .await?
            .ok_or(ServiceError::NoPendingInvite)?;

        let token = self.tokens.encode(&invite)?;
        self.email
            .send_invite_email(
                &invite.email,
                invite.role().unwrap_or(InviteRole::Student),
                &token,
                &self.settings.frontend_base_url,
            )
            .await?;

        Ok(invite)
    }

    /// Cancel a pending invite by transitioning it to expired.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid, cancelled_by: Uuid) -> Result<Invite, ServiceError> {
        let mut tx = self.bounded(self.store.begin()).await?;
        let outcome = self.bounded(Self::cancel_in_tx(tx.as_mut(), id)).await;

        match outcome {
            Ok(invite) => {
                if let Err(e) = self.cache.del(id).await {
                    tracing::warn!(invite_id = %id, error = %e, "Failed to invalidate cache");
                }
                self.bounded(tx.commit()).await?;

                tracing::info!(invite_id = %id, "Invite cancelled");
                self.audit
                    .record(AuditEvent::new(
                        AuditAction::InviteCancelled,
                        Some(id),
                        Some(invite.email.clone()),
                        Some(invite.role_code.clone()),
                        Some(cancelled_by),
                        None,
                        None,
                    ))
                    .await;
                Ok(invite)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                self.refuse(e, Some(id), None, None, cancelled_by, None).await
            }
        }
    }

    async fn cancel_in_tx(tx: &mut dyn InviteTx, id: Uuid) -> Result<Invite, ServiceError> {
        let invite = tx
            .get_for_update(id)
            .await?
            .ok_or(ServiceError::InviteNotFound)?;

        if invite.state() != InviteState::Pending {
            return Err(ServiceError::AlreadyProcessed);
        }

        tx.mark_expired(id)
            .await?
            .ok_or(ServiceError::AlreadyProcessed)
    }

    /// Transition every overdue pending invite to expired. Idempotent; a run
    /// with nothing newly expired is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64, ServiceError> {
        let mut tx = self.bounded(self.store.begin()).await?;
        let outcome = self.bounded(Self::cleanup_in_tx(tx.as_mut())).await;

        match outcome {
            Ok(expired) => {
                for invite in &expired {
                    if let Err(e) = self.cache.del(invite.invite_id).await {
                        tracing::warn!(invite_id = %invite.invite_id, error = %e, "Failed to invalidate cache");
                    }
                }
                self.bounded(tx.commit()).await?;

                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "Expired overdue invites");
                }
                for invite in &expired {
                    self.audit
                        .record(AuditEvent::new(
                            AuditAction::InviteExpired,
                            Some(invite.invite_id),
                            Some(invite.email.clone()),
                            Some(invite.role_code.clone()),
                            None,
                            None,
                            None,
                        ))
                        .await;
                }
                Ok(expired.len() as u64)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn cleanup_in_tx(tx: &mut dyn InviteTx) -> Result<Vec<Invite>, ServiceError> {
        let overdue = tx.expired_pending_for_update(Utc::now()).await?;
        if overdue.is_empty() {
            return Ok(overdue);
        }
        let ids: Vec<Uuid> = overdue.iter().map(|i| i.invite_id).collect();
        tx.expire_many(&ids).await?;
        Ok(overdue)
    }

    /// Read-through lookup: cache first, then the store, repopulating the
    /// cache on a miss.
    pub async fn get(&self, id: Uuid) -> Result<Option<Invite>, ServiceError> {
        if let Some(invite) = self.cache.get(id).await? {
            return Ok(Some(invite));
        }
        match self.store.get(id).await? {
            Some(invite) => {
                if let Err(e) = self.cache.put(&invite).await {
                    tracing::warn!(invite_id = %id, error = %e, "Failed to populate cache");
                }
                Ok(Some(invite))
            }
            None => Ok(None),
        }
    }

    pub async fn list_by_email(&self, email: &str) -> Result<Vec<Invite>, ServiceError> {
        self.store.list_by_email(email).await
    }

    pub async fn list(
        &self,
        filter: &InviteFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Invite>, i64), ServiceError> {
        self.store.list(filter, page, limit).await
    }

    /// Record a refused operation and propagate the error. Every gate
    /// rejection and rolled-back transition funnels through here so the
    /// audit trail covers failures as well as successes.
    async fn refuse<T>(
        &self,
        err: ServiceError,
        invite_id: Option<Uuid>,
        email: Option<&str>,
        role_code: Option<&str>,
        actor: Uuid,
        client_ip: Option<&str>,
    ) -> Result<T, ServiceError> {
        self.audit
            .record(AuditEvent::new(
                AuditAction::InviteRefused,
                invite_id,
                email.map(str::to_string),
                role_code.map(str::to_string),
                Some(actor),
                client_ip.map(str::to_string),
                Some(err.to_string()),
            ))
            .await;
        Err(err)
    }

    /// Bound a transactional section by the configured timeout. Dropping the
    /// underlying transaction rolls it back.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ServiceError>> + Send,
    ) -> Result<T, ServiceError> {
        match tokio::time::timeout(self.settings.tx_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Internal(anyhow::anyhow!(
                "invite transaction timed out; safe to retry"
            ))),
        }
    }
}
