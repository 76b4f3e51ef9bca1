//! Application state shared by every request
//!
//! Built once at boot. Construction fails when the service registry is invalid or a
//! required service is missing, so a misconfigured gateway never accepts traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::services::{
    auth::TokenVerifier,
    proxy::ReverseProxy,
    rate_limiter::{RateLimitPolicy, RateLimiterService},
    registry::ServiceRegistry,
};

pub const GLOBAL_POLICY_ID: &str = "global";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ServiceRegistry>,
    pub verifier: Arc<TokenVerifier>,
    pub rate_limiter: RateLimiterService,
    pub proxy: ReverseProxy,
    /// `None` when the global throttle is disabled
    pub global_policy: Option<RateLimitPolicy>,
    pub started_at: Instant,
}

impl AppState {
    /// Initialize application state with the in-memory counter store
    pub fn new(config: Config) -> Result<Self> {
        Self::with_rate_limiter(config, RateLimiterService::in_memory())
    }

    /// Initialize application state around an existing rate limiter
    pub fn with_rate_limiter(config: Config, rate_limiter: RateLimiterService) -> Result<Self> {
        info!("Initializing application state...");

        let registry = ServiceRegistry::from_config(&config.routing)?;
        let proxy = ReverseProxy::new(&config.routing, config.server.max_body_bytes)?;
        let verifier = TokenVerifier::new(&config.auth.jwt_secret);

        let global_policy = config.rate_limiting.enabled.then(|| {
            RateLimitPolicy::new(
                GLOBAL_POLICY_ID,
                Duration::from_millis(config.rate_limiting.window_ms),
                config.rate_limiting.max_requests,
            )
        });

        info!(
            environment = %config.environment,
            global_rate_limit = global_policy.is_some(),
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            verifier: Arc::new(verifier),
            rate_limiter,
            proxy,
            global_policy,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
