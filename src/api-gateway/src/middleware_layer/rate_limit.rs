//! Rate limiting middleware
//!
//! The global throttle runs for every request before routing. Route throttles are
//! a stage of their route's chain and go through [`enforce_route_limit`].

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{
    error::{GatewayError, Result},
    services::rate_limiter::{RateLimitDecision, RateLimitPolicy},
    state::AppState,
};

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Process-wide throttle applied before route matching
pub async fn global_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let Some(policy) = state.global_policy.as_ref() else {
        return Ok(next.run(request).await);
    };

    let client_key = client_key(&request, state.config.rate_limiting.trust_proxy_headers);
    let decision = state.rate_limiter.check(policy, &client_key);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs();
        warn!(
            key = %client_key,
            path = %request.uri().path(),
            retry_after_secs = retry_after,
            "Global rate limit exceeded"
        );
        return Err(GatewayError::rate_limited(
            format!("too many requests, try again in {} seconds", retry_after),
            decision,
        ));
    }

    let mut response = next.run(request).await;

    // A route throttle that already answered is more specific.
    if !response.headers().contains_key(RATELIMIT_LIMIT) {
        add_rate_limit_headers(response.headers_mut(), &decision);
    }

    Ok(response)
}

/// Count the request against a route policy.
pub fn enforce_route_limit(
    state: &AppState,
    policy: &RateLimitPolicy,
    request: &Request,
) -> Result<RateLimitDecision> {
    let client_key = client_key(request, state.config.rate_limiting.trust_proxy_headers);
    let decision = state.rate_limiter.check(policy, &client_key);

    if !decision.allowed {
        let retry_after = decision.retry_after_secs();
        warn!(
            key = %client_key,
            policy = %policy.id,
            retry_after_secs = retry_after,
            "Route rate limit exceeded"
        );
        return Err(GatewayError::rate_limited(
            format!(
                "too many requests for this endpoint, try again in {} seconds",
                retry_after
            ),
            decision,
        ));
    }

    Ok(decision)
}

/// Client identity used as the counter key: the peer address, or the first
/// forwarded address when proxy headers are trusted.
pub fn client_key(request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = forwarded_address(request.headers()) {
            return forwarded;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded_for.or_else(real_ip).map(str::to_string)
}

pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATELIMIT_RESET,
        HeaderValue::from(decision.retry_after_secs()),
    );
}
