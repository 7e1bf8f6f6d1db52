//! Tightship API server

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tightship_api::{routes, AppState, Config};
use tightship_billing::BillingService;
use tightship_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in development; a missing file is fine
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!(
        bind_address = %config.bind_address,
        enable_billing = config.enable_billing,
        "Starting Tightship API"
    );

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Billing clients are constructed once at startup and injected; when the
    // Stripe key is missing the deployment runs with billing disabled
    let billing = if config.enable_billing && !config.stripe_secret_key.is_empty() {
        match BillingService::from_env(pool.clone()) {
            Ok(service) => Some(service),
            Err(e) => {
                tracing::warn!(error = %e, "Billing disabled: configuration incomplete");
                None
            }
        }
    } else {
        tracing::warn!("Billing disabled for this deployment");
        None
    };

    let rate_limiter = tightship_api::rate_limit::RateLimiter::connect(&config.redis_url).await;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config, billing, rate_limiter);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolve on ctrl-c or SIGTERM for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
