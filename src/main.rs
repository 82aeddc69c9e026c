//! Gatekeeper server
//!
//! Loads configuration, picks Postgres or in-memory stores, and serves the
//! auth API until Ctrl+C or SIGTERM.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use gatekeeper::auth::{
    run_purge_loop, InMemoryRefreshTokenStore, InMemoryUserStore, LogNotifier, OtpNotifier,
    PgRefreshTokenStore, PgUserStore, RefreshTokenStore, SmtpNotifier, SystemClock, UserStore,
};
use gatekeeper::config::Config;
use gatekeeper::middleware::{RateLimiter, SecurityHeaders};
use gatekeeper::routes::{app_router, RouterOptions};
use gatekeeper::state::AppState;
use gatekeeper::{build_auth_service, db};

const OTP_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        auth_mode = ?config.auth_mode,
        "Starting Gatekeeper"
    );

    // Stores
    let (users, refresh_store, db_pool): (Arc<dyn UserStore>, Arc<dyn RefreshTokenStore>, _) =
        if config.uses_in_memory_store() {
            tracing::warn!("DATABASE_URL=memory, accounts and sessions will not survive a restart");
            (
                Arc::new(InMemoryUserStore::new()),
                Arc::new(InMemoryRefreshTokenStore::new()),
                None,
            )
        } else {
            let pool = db::create_pool(&config).await?;
            db::run_migrations(&pool).await?;
            (
                Arc::new(PgUserStore::new(pool.clone())),
                Arc::new(PgRefreshTokenStore::new(pool.clone())),
                Some(pool),
            )
        };

    // OTP delivery
    let notifier: Arc<dyn OtpNotifier> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "OTP delivery via SMTP");
            Arc::new(SmtpNotifier::new(smtp)?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, OTP codes will only be logged");
            Arc::new(LogNotifier::new(!config.environment.is_production()))
        }
    };

    let auth_service = build_auth_service(
        &config,
        users,
        refresh_store,
        notifier,
        Arc::new(SystemClock),
    )?;

    // Expired OTPs are already invisible to lookups; this only reclaims memory.
    tokio::spawn(run_purge_loop(auth_service.otp_cache(), OTP_PURGE_INTERVAL));

    let rate_limiter =
        RateLimiter::new(config.rate_limit_rps).trust_proxy_headers(config.trust_proxy_headers);
    tokio::spawn(rate_limiter.clone().run_cleanup_loop(RATE_LIMIT_CLEANUP_INTERVAL));

    let app_state = AppState::new(Arc::new(auth_service), db_pool);

    let app = app_router(
        app_state,
        rate_limiter,
        RouterOptions {
            cors_allowed_origins: config.cors_allowed_origins.clone(),
            security: SecurityHeaders {
                hsts: config.environment.is_production(),
            },
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
