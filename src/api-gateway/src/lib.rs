//! News Platform API Gateway Library
//!
//! The single network-facing process in front of the platform's backend services:
//! it verifies bearer tokens, throttles callers, forwards requests to the backend
//! declared in the service registry and translates every failure into one JSON
//! error envelope.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware_layer;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

// Re-export main types and functions for external use
pub use crate::config::{
    AuthConfig, Config, CorsConfig, RateLimitConfig, RoutingConfig, ServerConfig,
};
pub use crate::error::{GatewayError, Result};
pub use crate::state::AppState;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::routes::gateway::RouteTable;

/// Build the main application router with all middleware and routes
pub fn build_router(state: AppState) -> Result<Router> {
    let route_table = RouteTable::build(&state.registry)?;
    let cors = cors_layer(&state.config.cors)?;

    let router = Router::new()
        .merge(routes::public::router())
        .merge(route_table.into_router())
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-dns-prefetch-control"),
                    HeaderValue::from_static("off"),
                ))
                .layer(CompressionLayer::new())
                .layer(middleware::from_fn(
                    middleware_layer::logging::logging_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    middleware_layer::error_handling::error_translator_middleware,
                ))
                .layer(CatchPanicLayer::custom(
                    middleware_layer::error_handling::handle_panic,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    middleware_layer::rate_limit::global_rate_limit_middleware,
                )),
        )
        .with_state(state);

    Ok(router)
}

fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let origins = cors
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| {
                GatewayError::configuration(format!("invalid CORS origin '{}': {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}
