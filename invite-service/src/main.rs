use invite_service::{
    build_router,
    config::InviteConfig,
    services::{
        Database, DomainPolicy, EmailService, InviteCache, InviteService, InviteSettings,
        InviteTokenService, PgAuditSink, RateLimiter, RedisService, SpamGuard,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration and fail fast if invalid
    let config = InviteConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config
            .otlp_endpoint
            .as_deref()
            .unwrap_or("http://tempo:4317"),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting invite service"
    );

    // Initialize Postgres and run pending migrations
    let db = Database::connect(&config.database.url, config.database.max_connections).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Initialize Redis
    let redis = Arc::new(RedisService::new(&config.redis.url).await?);
    tracing::info!("Redis service initialized");

    // Initialize email service
    let email = Arc::new(EmailService::new(&config.smtp)?);
    tracing::info!("Email service initialized");

    let tokens = InviteTokenService::new(&config.token.secret);
    let policy = DomainPolicy::new(config.invites.allowed_domains.clone());
    let cache = InviteCache::new(redis.clone(), config.invites.cache_ttl_seconds as i64);
    let limiter = RateLimiter::new(
        redis.clone(),
        config.rate_limit.ip_limit,
        config.rate_limit.ip_window_seconds,
        config.rate_limit.email_limit,
        config.rate_limit.email_window_seconds,
    );
    let spam = SpamGuard::new(
        redis.clone(),
        config.invites.spam_threshold,
        config.invites.spam_window_seconds,
    );
    let audit = Arc::new(PgAuditSink::new(db.pool().clone()));

    let store = Arc::new(db);
    let invites = InviteService::new(
        store.clone(),
        cache,
        tokens,
        email,
        policy,
        limiter,
        spam,
        audit,
        InviteSettings {
            invite_ttl_days: config.invites.invite_ttl_days,
            frontend_base_url: config.invites.frontend_base_url.clone(),
            tx_timeout: Duration::from_secs(config.invites.tx_timeout_seconds),
        },
    );

    // Perimeter rate limiter in front of the router
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let state = AppState {
        config: config.clone(),
        invites: invites.clone(),
        store,
        cache: redis,
        ip_rate_limiter,
    };

    // Periodic expiry sweep; the endpoint stays available for manual runs
    let cleanup_interval = Duration::from_secs(config.invites.cleanup_interval_seconds);
    let sweeper = invites.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweeper.cleanup_expired().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Background sweep expired invites"),
                Err(e) => tracing::warn!(error = %e, "Background expiry sweep failed"),
            }
        }
    });

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
