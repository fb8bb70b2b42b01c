//! Invite model - pending offers to join the school as a given role.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invite lifecycle state codes.
///
/// Transitions are one-directional: `pending -> accepted` or
/// `pending -> expired`. Both non-pending states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteState {
    Pending,
    Accepted,
    Expired,
}

impl InviteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteState::Pending => "pending",
            InviteState::Accepted => "accepted",
            InviteState::Expired => "expired",
        }
    }
}

impl std::str::FromStr for InviteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InviteState::Pending),
            "accepted" => Ok(InviteState::Accepted),
            "expired" => Ok(InviteState::Expired),
            other => Err(format!("Invalid invite state: {}", other)),
        }
    }
}

/// Roles an invite can grant. Closed set; teacher and admin are
/// privileged and subject to the email domain allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteRole {
    Admin,
    Teacher,
    Student,
}

impl InviteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteRole::Admin => "admin",
            InviteRole::Teacher => "teacher",
            InviteRole::Student => "student",
        }
    }

    /// Privileged roles require the email domain to be on the allow-list.
    pub fn is_privileged(&self) -> bool {
        matches!(self, InviteRole::Admin | InviteRole::Teacher)
    }
}

impl std::str::FromStr for InviteRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(InviteRole::Admin),
            "teacher" => Ok(InviteRole::Teacher),
            "student" => Ok(InviteRole::Student),
            other => Err(format!("Invalid invite role: {}", other)),
        }
    }
}

/// Invite entity. The database row is the source of truth; tokens only
/// carry a copy of the identity claims.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invite {
    pub invite_id: Uuid,
    pub email: String,
    pub role_code: String,
    pub state_code: String,
    pub invited_by_user_id: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub accepted_by_user_id: Option<Uuid>,
}

impl Invite {
    /// Create a new pending invite expiring `ttl_days` from now.
    pub fn new(email: String, role: InviteRole, invited_by: Uuid, ttl_days: i64) -> Self {
        let now = Utc::now();
        Self {
            invite_id: Uuid::new_v4(),
            email,
            role_code: role.as_str().to_string(),
            state_code: InviteState::Pending.as_str().to_string(),
            invited_by_user_id: invited_by,
            created_utc: now,
            updated_utc: now,
            expiry_utc: now + Duration::days(ttl_days),
            accepted_utc: None,
            accepted_by_user_id: None,
        }
    }

    pub fn state(&self) -> InviteState {
        self.state_code.parse().unwrap_or(InviteState::Expired)
    }

    pub fn role(&self) -> Option<InviteRole> {
        self.role_code.parse().ok()
    }

    /// Pending and not past its expiry instant.
    pub fn is_active(&self) -> bool {
        self.state() == InviteState::Pending && Utc::now() < self.expiry_utc
    }

    pub fn is_expired_by_time(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_invite_is_pending_and_expires_in_the_future() {
        let invite = Invite::new(
            "new.teacher@school.edu".to_string(),
            InviteRole::Teacher,
            Uuid::new_v4(),
            7,
        );
        assert_eq!(invite.state(), InviteState::Pending);
        assert!(invite.expiry_utc > invite.created_utc);
        assert!(invite.is_active());
    }

    #[test]
    fn role_round_trips_through_state_code() {
        let invite = Invite::new("a@b.edu".to_string(), InviteRole::Admin, Uuid::new_v4(), 7);
        assert_eq!(invite.role(), Some(InviteRole::Admin));
        assert!(InviteRole::Admin.is_privileged());
        assert!(InviteRole::Teacher.is_privileged());
        assert!(!InviteRole::Student.is_privileged());
    }
}
