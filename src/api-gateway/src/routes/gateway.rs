//! Proxied backend routes
//!
//! Built once at startup from the service registry. Every declared route becomes a
//! [`RouteBinding`]: the ordered stages it runs before the request is forwarded,
//! mounted at `/api/<service><route path>`. Parameter segments stay in the mount
//! pattern only for matching; the proxy forwards the original request path.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
    routing::{any, on, MethodFilter, MethodRouter},
    Router,
};
use tracing::{debug, info};

use crate::{
    error::{GatewayError, Result},
    handlers,
    middleware_layer::{
        auth::{authenticate, require_roles},
        logging::caller_label,
        rate_limit::{add_rate_limit_headers, enforce_route_limit},
    },
    services::{
        auth::Role,
        proxy::ServiceTarget,
        rate_limiter::RateLimitPolicy,
        registry::{RouteDefinition, ServiceDefinition, ServiceRegistry},
    },
    state::AppState,
};

/// One step of a route chain
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Authenticate,
    Throttle(RateLimitPolicy),
    RequireRole(Vec<Role>),
}

/// Materialized chain for one declared route
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub target: Arc<ServiceTarget>,
    pub mount_path: String,
    pub methods: Option<MethodFilter>,
    pub stages: Arc<[Stage]>,
}

impl RouteBinding {
    pub fn build(service: &ServiceDefinition, route: &RouteDefinition) -> Result<Self> {
        let mount_path = format!("{}{}", service.prefix(), route.path);

        let mut stages = Vec::new();
        if route.authenticated() {
            stages.push(Stage::Authenticate);
        }
        if let Some(rule) = &route.rate_limit {
            let id = format!("route:{}:{}", service.name, route.path);
            stages.push(Stage::Throttle(RateLimitPolicy::from_rule(id, rule)));
        }
        if !route.roles.is_empty() {
            stages.push(Stage::RequireRole(route.roles.clone()));
        }

        let methods = route
            .parsed_methods()?
            .into_iter()
            .map(|method| {
                MethodFilter::try_from(method.clone()).map_err(|_| {
                    GatewayError::configuration(format!(
                        "method '{}' cannot be routed on '{}'",
                        method, mount_path
                    ))
                })
            })
            .try_fold(None, |acc: Option<MethodFilter>, filter| {
                filter.map(|filter| Some(acc.map_or(filter, |acc| acc.or(filter))))
            })?;

        Ok(Self {
            target: Arc::new(ServiceTarget::new(&service.name, &service.base_address)),
            mount_path,
            methods,
            stages: stages.into(),
        })
    }

    /// Run the chain, then forward to the backend.
    pub async fn dispatch(&self, state: &AppState, mut request: Request) -> Result<Response> {
        let mut route_decision = None;

        for stage in self.stages.iter() {
            match stage {
                Stage::Authenticate => authenticate(&state.verifier, &mut request)?,
                Stage::Throttle(policy) => {
                    route_decision = Some(enforce_route_limit(state, policy, &request)?);
                }
                Stage::RequireRole(roles) => require_roles(&request, roles)?,
            }
        }

        debug!(
            route = %self.mount_path,
            service = %self.target.name,
            caller = %caller_label(&request),
            "Route chain passed"
        );

        let mut response = state.proxy.forward(&self.target, request).await?;
        if let Some(decision) = route_decision {
            add_rate_limit_headers(response.headers_mut(), &decision);
        }
        Ok(response)
    }

    fn method_router(self) -> MethodRouter<AppState> {
        let filter = self.methods;
        let binding = Arc::new(self);
        let handler = move |State(state): State<AppState>, request: Request| {
            let binding = Arc::clone(&binding);
            async move { binding.dispatch(&state, request).await }
        };

        // Undeclared methods answer like an unknown path.
        match filter {
            Some(filter) => on(filter, handler).fallback(handlers::not_found),
            None => any(handler),
        }
    }
}

/// Every binding derived from the registry, in declaration order
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    bindings: Vec<RouteBinding>,
}

impl RouteTable {
    pub fn build(registry: &ServiceRegistry) -> Result<Self> {
        let mut bindings = Vec::with_capacity(registry.route_count());

        for service in registry.services() {
            for route in &service.routes {
                bindings.push(RouteBinding::build(service, route)?);
            }
        }

        info!(routes = bindings.len(), "Route table built");
        Ok(Self { bindings })
    }

    pub fn bindings(&self) -> &[RouteBinding] {
        &self.bindings
    }

    pub fn find(&self, mount_path: &str) -> Option<&RouteBinding> {
        self.bindings.iter().find(|b| b.mount_path == mount_path)
    }

    pub fn into_router(self) -> Router<AppState> {
        self.bindings
            .into_iter()
            .fold(Router::new(), |router, binding| {
                let path = binding.mount_path.clone();
                router.route(&path, binding.method_router())
            })
    }
}
