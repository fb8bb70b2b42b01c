//! Closed error-kind enum for the invite pipeline.
//!
//! Every expected failure of the invite operations is a distinct variant so
//! callers can branch on the kind instead of parsing messages. Conversion to
//! the shared `AppError` happens once, at the handler boundary.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid email format")]
    InvalidEmailFormat,

    #[error("Email domain not allowed for role {role}: {domain}")]
    DomainNotAllowed { domain: String, role: String },

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Too many invite attempts for this email")]
    SpamDetected,

    #[error("Invalid invite token")]
    InvalidToken,

    #[error("Invite token has expired")]
    TokenExpired,

    #[error("Invite not found")]
    InviteNotFound,

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invite has already been accepted")]
    AlreadyAccepted,

    #[error("Invite has already been used")]
    AlreadyUsed,

    #[error("Invite has already been processed")]
    AlreadyProcessed,

    #[error("Email does not match the invite")]
    EmailMismatch,

    #[error("Role does not match the invite")]
    RoleMismatch,

    #[error("No pending invite for this email")]
    NoPendingInvite,

    #[error("Email delivery failed: {0}")]
    Email(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidEmailFormat => {
                AppError::BadRequest(anyhow::anyhow!("Invalid email format"))
            }
            ServiceError::DomainNotAllowed { domain, role } => AppError::Forbidden(anyhow::anyhow!(
                "Email domain '{}' is not allowed for role '{}'",
                domain,
                role
            )),
            ServiceError::RateLimited(what) => AppError::TooManyRequests(
                format!("Rate limit exceeded for {}. Please try again later.", what),
                None,
            ),
            ServiceError::SpamDetected => AppError::TooManyRequests(
                "Too many invite attempts for this email. Please try again later.".to_string(),
                None,
            ),
            ServiceError::InvalidToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid invite token"))
            }
            ServiceError::TokenExpired => {
                AppError::Gone(anyhow::anyhow!("Invite token has expired"))
            }
            ServiceError::InviteNotFound => AppError::NotFound(anyhow::anyhow!("Invite not found")),
            ServiceError::InviteExpired => AppError::Gone(anyhow::anyhow!("Invite has expired")),
            ServiceError::AlreadyAccepted => {
                AppError::Conflict(anyhow::anyhow!("Invite has already been accepted"))
            }
            ServiceError::AlreadyUsed => {
                AppError::Conflict(anyhow::anyhow!("Invite has already been used"))
            }
            ServiceError::AlreadyProcessed => {
                AppError::Conflict(anyhow::anyhow!("Invite has already been processed"))
            }
            ServiceError::EmailMismatch => {
                AppError::Conflict(anyhow::anyhow!("Email does not match the invite"))
            }
            ServiceError::RoleMismatch => {
                AppError::Conflict(anyhow::anyhow!("Role does not match the invite"))
            }
            ServiceError::NoPendingInvite => {
                AppError::NotFound(anyhow::anyhow!("No pending invite for this email"))
            }
            ServiceError::Email(msg) => AppError::EmailError(msg),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Cache(e) => AppError::InternalError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
