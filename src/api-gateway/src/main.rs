//! News Platform API Gateway
//!
//! Single entry point in front of the auth, ml and notification services.
//! Provides authentication, rate limiting, routing and uniform error responses.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use news_api_gateway::{build_router, services::rate_limiter::RateLimiterService, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        "Starting News Platform API Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env().context("failed to load configuration")?;
    config.validate()?;
    info!(
        "Configuration loaded for environment: {}",
        config.environment
    );

    let state = AppState::new(config.clone()).context("failed to initialize application state")?;

    spawn_counter_cleanup(
        state.rate_limiter.clone(),
        Duration::from_secs(config.rate_limiting.cleanup_interval_seconds.max(1)),
    );

    let app = build_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("API Gateway listening on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("API Gateway shutdown complete");
    Ok(())
}

/// Initialize structured JSON logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "news_api_gateway=debug,api_gateway=debug,tower_http=debug,axum::rejection=trace"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Periodically drop rate limit counters whose window has elapsed
fn spawn_counter_cleanup(rate_limiter: RateLimiterService, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = rate_limiter.purge_expired();
            if removed > 0 {
                debug!(
                    removed,
                    tracked = rate_limiter.tracked_keys(),
                    "Purged expired rate limit counters"
                );
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            warn!("Received SIGTERM, shutting down gracefully");
        },
    }
}
