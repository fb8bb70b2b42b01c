use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Invite, InviteRole};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInviteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub role: InviteRole,

    pub invited_by_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub invite_id: Uuid,
    pub email: String,
    pub role: String,
    pub state: String,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_utc: Option<DateTime<Utc>>,
}

impl From<Invite> for InviteResponse {
    fn from(invite: Invite) -> Self {
        Self {
            invite_id: invite.invite_id,
            email: invite.email,
            role: invite.role_code,
            state: invite.state_code,
            created_utc: invite.created_utc,
            expiry_utc: invite.expiry_utc,
            accepted_utc: invite.accepted_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateInviteQuery {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcceptInviteRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    pub accepted_by_user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResendInviteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub invited_by_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListInvitesQuery {
    pub state: Option<String>,
    pub role: Option<String>,
    pub email: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListInvitesResponse {
    pub invites: Vec<InviteResponse>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub expired: u64,
}
