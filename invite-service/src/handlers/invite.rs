//! HTTP handlers for the invite lifecycle.
//!
//! Handlers stay thin: extract and validate input, delegate to the invite
//! service, and map the result to a response. Error mapping lives in
//! `services::error`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::dtos::{
    AcceptInviteRequest, CleanupResponse, CreateInviteRequest, InviteResponse, ListInvitesQuery,
    ListInvitesResponse, ResendInviteRequest, ValidateInviteQuery,
};
use crate::services::{InviteFilter, InvitePreview};
use crate::utils::{ClientIp, ValidatedJson, ValidatedQuery};
use crate::AppState;
use service_core::error::AppError;

/// Issue a new invite and email its signup link.
///
/// POST /invites
#[tracing::instrument(skip(state, req), fields(client_ip = %client_ip))]
pub async fn create_invite(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    ValidatedJson(req): ValidatedJson<CreateInviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), AppError> {
    let invite = state
        .invites
        .create(&req.email, req.role, req.invited_by_user_id, &client_ip)
        .await?;

    Ok((StatusCode::CREATED, Json(invite.into())))
}

/// List invites with optional state/role/email filters.
///
/// GET /invites
#[tracing::instrument(skip(state, query))]
pub async fn list_invites(
    State(state): State<AppState>,
    Query(query): Query<ListInvitesQuery>,
) -> Result<Json<ListInvitesResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let state_filter = query
        .state
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Unknown invite state")))?;
    let role_filter = query
        .role
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Unknown invite role")))?;

    let filter = InviteFilter {
        state: state_filter,
        role: role_filter,
        email: query.email,
    };

    let (invites, total) = state.invites.list(&filter, page, limit).await?;

    Ok(Json(ListInvitesResponse {
        invites: invites.into_iter().map(InviteResponse::from).collect(),
        total,
        page,
        limit,
    }))
}

/// Check a token against the stored invite without mutating anything.
///
/// GET /invites/validate?token=...
#[tracing::instrument(skip_all)]
pub async fn validate_invite(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ValidateInviteQuery>,
) -> Result<Json<InvitePreview>, AppError> {
    let preview = state.invites.validate_token(&query.token).await?;
    Ok(Json(preview))
}

/// Consume an invite token and mark the invite accepted.
///
/// POST /invites/accept
#[tracing::instrument(skip_all)]
pub async fn accept_invite(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AcceptInviteRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    let invite = state
        .invites
        .accept_with_token(&req.token, req.accepted_by_user_id)
        .await?;

    Ok(Json(invite.into()))
}

/// Extend the newest pending invite for an email and re-send its link.
///
/// POST /invites/resend
#[tracing::instrument(skip(state, req), fields(client_ip = %client_ip))]
pub async fn resend_invite(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    ValidatedJson(req): ValidatedJson<ResendInviteRequest>,
) -> Result<Json<InviteResponse>, AppError> {
    let invite = state
        .invites
        .resend(&req.email, req.invited_by_user_id, &client_ip)
        .await?;

    Ok(Json(invite.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct CancelInviteQuery {
    pub cancelled_by_user_id: Option<Uuid>,
}

/// Cancel a pending invite.
///
/// DELETE /invites/:id
#[tracing::instrument(skip(state))]
pub async fn cancel_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<Uuid>,
    Query(query): Query<CancelInviteQuery>,
) -> Result<Json<InviteResponse>, AppError> {
    let actor = query.cancelled_by_user_id.unwrap_or(Uuid::nil());
    let invite = state.invites.cancel(invite_id, actor).await?;
    Ok(Json(invite.into()))
}

/// Transition overdue pending invites to expired.
///
/// POST /invites/cleanup
#[tracing::instrument(skip(state))]
pub async fn cleanup_invites(
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, AppError> {
    let expired = state.invites.cleanup_expired().await?;
    Ok(Json(CleanupResponse { expired }))
}
