//! Audit trail entries for invite lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    InviteCreated,
    InviteAccepted,
    InviteCancelled,
    InviteResent,
    InviteExpired,
    InviteRefused,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::InviteCreated => "invite_created",
            AuditAction::InviteAccepted => "invite_accepted",
            AuditAction::InviteCancelled => "invite_cancelled",
            AuditAction::InviteResent => "invite_resent",
            AuditAction::InviteExpired => "invite_expired",
            AuditAction::InviteRefused => "invite_refused",
        }
    }
}

/// Audit event entity. Written fire-and-forget; losing one must never fail
/// the operation it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub action: AuditAction,
    pub invite_id: Option<Uuid>,
    /// Unknown for failures identified only by invite id.
    pub email: Option<String>,
    pub role_code: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub client_ip: Option<String>,
    pub detail: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        invite_id: Option<Uuid>,
        email: Option<String>,
        role_code: Option<String>,
        actor_user_id: Option<Uuid>,
        client_ip: Option<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            action,
            invite_id,
            email,
            role_code,
            actor_user_id,
            client_ip,
            detail,
            created_utc: Utc::now(),
        }
    }
}
