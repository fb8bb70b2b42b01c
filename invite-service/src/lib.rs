pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::ip_rate_limit_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::InviteConfig;
use crate::services::{CacheStore, InviteService, InviteStore};
use service_core::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: InviteConfig,
    pub invites: InviteService,
    pub store: Arc<dyn InviteStore>,
    pub cache: Arc<dyn CacheStore>,
    pub ip_rate_limiter: service_core::middleware::rate_limit::IpRateLimiter,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/invites",
            post(handlers::invite::create_invite).get(handlers::invite::list_invites),
        )
        .route("/invites/validate", get(handlers::invite::validate_invite))
        .route("/invites/accept", post(handlers::invite::accept_invite))
        .route("/invites/resend", post(handlers::invite::resend_invite))
        .route("/invites/cleanup", post(handlers::invite::cleanup_invites))
        .route("/invites/:id", delete(handlers::invite::cancel_invite))
        .with_state(state.clone())
        // Perimeter IP rate limiting; the service applies its own
        // cross-instance limits on top
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .invites
                        .frontend_base_url
                        .parse::<service_core::axum::http::HeaderValue>()
                        .map_err(|e| {
                            AppError::ConfigError(anyhow::anyhow!(
                                "Invalid CORS origin '{}': {}",
                                state.config.invites.frontend_base_url,
                                e
                            ))
                        })?,
                )
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::DELETE,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}

/// Service health check
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
