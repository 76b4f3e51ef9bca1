//! Application Configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then
//! `config/default.yaml`, then `config/environments/<APP_ENVIRONMENT>.yaml`, then
//! `APP__*` environment variables. The service registry is part of the routing
//! section and is read once at boot.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use crate::services::registry::ServiceDefinition;

const DEVELOPMENT_JWT_SECRET: &str = "development_secret_key_change_me";

/// Main configuration for the application
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limiting: RateLimitConfig,
    pub routing: RoutingConfig,
    pub cors: CorsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest request body the proxy will buffer
    pub max_body_bytes: usize,
}

/// Token verification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret shared with the auth backend
    pub jwt_secret: String,
}

/// Process-wide throttling defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Toggles the global policy; route policies always apply
    pub enabled: bool,
    pub window_ms: u64,
    pub max_requests: u32,
    pub cleanup_interval_seconds: u64,
    /// Key clients by X-Forwarded-For / X-Real-IP instead of the peer address.
    /// Only enable behind a trusted proxy that overwrites these headers; a
    /// client-supplied value would otherwise pick its own counter.
    pub trust_proxy_headers: bool,
}

/// Backend routing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Services that must be present for the gateway to start
    pub required_services: Vec<String>,
    /// Base address overrides by service name
    pub upstreams: HashMap<String, String>,
    pub services: Vec<ServiceDefinition>,
    pub upstream_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables and config files
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let config_dir = std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(
                config::File::with_name(&format!(
                    "{}/environments/{}",
                    config_dir, environment
                ))
                .required(false),
            )
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .set_override("environment", environment)?;

        builder.build()?.try_deserialize()
    }

    /// Check if the environment is production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.auth.jwt_secret.is_empty() {
            return Err(anyhow::anyhow!("JWT secret must not be empty"));
        }
        if self.rate_limiting.window_ms == 0 || self.rate_limiting.max_requests == 0 {
            return Err(anyhow::anyhow!(
                "global rate limit window and max must be greater than zero"
            ));
        }
        if self.is_production() && self.auth.jwt_secret == DEVELOPMENT_JWT_SECRET {
            warn!("Using the built-in development JWT secret in production");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limiting: RateLimitConfig::default(),
            routing: RoutingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 15 * 60 * 1000, // 15 minutes
            max_requests: 100,
            cleanup_interval_seconds: 60,
            trust_proxy_headers: false,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            required_services: Vec::new(),
            upstreams: HashMap::new(),
            services: Vec::new(),
            upstream_timeout_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}
