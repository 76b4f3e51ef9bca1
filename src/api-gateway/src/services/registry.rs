//! Service registry: the declarative description of every backend
//!
//! Loaded once from configuration at boot and immutable afterwards. All structural
//! problems (duplicate names or paths, malformed or overlapping path patterns,
//! malformed addresses, missing required services) are configuration errors that
//! stop the gateway before it serves traffic.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use axum::http::Method;
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RoutingConfig;
use crate::error::{GatewayError, Result};
use crate::services::auth::Role;

const SUPPORTED_METHODS: [&str; 8] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE",
];

/// Custom throttling policy declared on a route
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max: u32,
}

impl RateLimitRule {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// One logical endpoint relative to its service prefix
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RouteDefinition {
    /// Path pattern, may contain `:param` segments
    pub path: String,
    #[serde(default, alias = "auth")]
    pub requires_auth: bool,
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,
    /// Allowed methods; empty means any method
    #[serde(default)]
    pub methods: Vec<String>,
    /// Roles admitted by the role gate; empty disables the gate
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl RouteDefinition {
    pub fn new(path: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            path: path.into(),
            requires_auth,
            rate_limit: None,
            methods: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub fn with_rate_limit(mut self, window_ms: u64, max: u32) -> Self {
        self.rate_limit = Some(RateLimitRule { window_ms, max });
        self
    }

    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    /// A role gate needs an identity, so it implies authentication.
    pub fn authenticated(&self) -> bool {
        self.requires_auth || !self.roles.is_empty()
    }

    pub fn parsed_methods(&self) -> Result<Vec<Method>> {
        self.methods
            .iter()
            .map(|raw| {
                let upper = raw.trim().to_ascii_uppercase();
                if !SUPPORTED_METHODS.contains(&upper.as_str()) {
                    return Err(GatewayError::configuration(format!(
                        "route '{}' declares unsupported method '{}'",
                        self.path, raw
                    )));
                }
                Method::from_bytes(upper.as_bytes()).map_err(|e| {
                    GatewayError::configuration(format!("invalid method '{}': {}", raw, e))
                })
            })
            .collect()
    }
}

/// One backend service
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(alias = "url")]
    pub base_address: String,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

impl ServiceDefinition {
    pub fn new(
        name: impl Into<String>,
        base_address: impl Into<String>,
        routes: Vec<RouteDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            base_address: base_address.into(),
            routes,
        }
    }

    /// Mount prefix for every route of this service
    pub fn prefix(&self) -> String {
        format!("/api/{}", self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(GatewayError::configuration(format!(
                "invalid service name '{}'",
                self.name
            )));
        }

        let url = Url::parse(&self.base_address).map_err(|e| {
            GatewayError::configuration(format!(
                "service '{}' has invalid base address '{}': {}",
                self.name, self.base_address, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::configuration(format!(
                "service '{}' base address must be http or https, got '{}'",
                self.name,
                url.scheme()
            )));
        }

        let mut paths = HashSet::new();
        let mut parameters: HashMap<String, &str> = HashMap::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(GatewayError::configuration(format!(
                    "route '{}' of service '{}' must start with '/'",
                    route.path, self.name
                )));
            }
            if !paths.insert(route.path.as_str()) {
                return Err(GatewayError::configuration(format!(
                    "duplicate route '{}' in service '{}'",
                    route.path, self.name
                )));
            }
            if let Some(rule) = route.rate_limit {
                if rule.window_ms == 0 || rule.max == 0 {
                    return Err(GatewayError::configuration(format!(
                        "route '{}' of service '{}' has an empty rate limit window or max",
                        route.path, self.name
                    )));
                }
            }
            route.parsed_methods()?;
            self.check_segments(route, &mut parameters)?;
        }

        Ok(())
    }

    /// Reject malformed parameter segments and parameters that would collide
    /// with another route's parameter at the same position.
    fn check_segments<'a>(
        &self,
        route: &'a RouteDefinition,
        parameters: &mut HashMap<String, &'a str>,
    ) -> Result<()> {
        let segments: Vec<&str> = route.path.split('/').collect();
        let invalid = |reason: &str| {
            GatewayError::configuration(format!(
                "route '{}' of service '{}' {}",
                route.path, self.name, reason
            ))
        };

        for (index, segment) in segments.iter().enumerate() {
            let Some(name) = segment.strip_prefix(':').or_else(|| segment.strip_prefix('*'))
            else {
                if segment.contains(':') || segment.contains('*') {
                    return Err(invalid("has a parameter in the middle of a segment"));
                }
                continue;
            };

            if name.is_empty() {
                return Err(invalid("has a parameter without a name"));
            }
            if name.contains(':') || name.contains('*') {
                return Err(invalid("has a parameter in the middle of a segment"));
            }
            if segment.starts_with('*') && index + 1 != segments.len() {
                return Err(invalid("has a catch-all that is not the last segment"));
            }

            let prefix = segments[..index].join("/");
            match parameters.get(&prefix) {
                Some(existing) if existing != segment => {
                    return Err(invalid(&format!(
                        "overlaps another route declaring '{}' at the same position",
                        existing
                    )));
                }
                Some(_) => {}
                None => {
                    parameters.insert(prefix, *segment);
                }
            }
        }

        Ok(())
    }
}

/// Validated, immutable set of backend services
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDefinition>,
}

impl ServiceRegistry {
    /// Validate a list of service definitions, normalizing base addresses.
    pub fn new(services: Vec<ServiceDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut normalized = Vec::with_capacity(services.len());

        for mut service in services {
            service.validate()?;
            if !names.insert(service.name.clone()) {
                return Err(GatewayError::configuration(format!(
                    "service '{}' is declared more than once",
                    service.name
                )));
            }
            service.base_address = service.base_address.trim_end_matches('/').to_string();
            normalized.push(service);
        }

        Ok(Self {
            services: normalized,
        })
    }

    /// Build the registry from the routing section, applying upstream overrides
    /// and checking that every required service is present.
    pub fn from_config(routing: &RoutingConfig) -> Result<Self> {
        let mut services = routing.services.clone();

        for (name, address) in &routing.upstreams {
            match services.iter_mut().find(|s| &s.name == name) {
                Some(service) => service.base_address = address.clone(),
                None => warn!(service = %name, "Upstream override for unknown service ignored"),
            }
        }

        let registry = Self::new(services)?;
        registry.require(&routing.required_services)?;

        info!(
            services = registry.services.len(),
            routes = registry.route_count(),
            "Service registry loaded"
        );

        Ok(registry)
    }

    /// Fail if any of the named services is missing.
    pub fn require(&self, names: &[String]) -> Result<()> {
        for name in names {
            if self.get(name).is_none() {
                return Err(GatewayError::configuration(format!(
                    "required service '{}' is not configured",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn route_count(&self) -> usize {
        self.services.iter().map(|s| s.routes.len()).sum()
    }
}
