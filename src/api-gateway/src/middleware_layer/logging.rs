//! Request logging middleware

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::header::{CONTENT_LENGTH, USER_AGENT},
    middleware::Next,
    response::Response,
};
use tracing::{error, info, warn, Instrument};

use crate::middleware_layer::{auth::extract_identity, rate_limit::client_key};

/// Request logging middleware that tracks all HTTP requests
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    // Matched pattern keeps parameterized routes grouped together
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched_path| matched_path.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|header| header.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let client_ip = client_key(&request, true);

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|header| header.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        request_id = %request_id,
        client_ip = %client_ip,
        user_agent = %user_agent,
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    );

    async move {
        info!(uri = %uri, "Request started");

        let response = next.run(request).await;

        let duration = start_time.elapsed();
        let status = response.status();
        let response_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|header| header.to_str().ok())
            .and_then(|size| size.parse::<u64>().ok())
            .unwrap_or(0);

        let span = tracing::Span::current();
        span.record("status", status.as_u16());
        span.record("duration_ms", duration.as_millis() as u64);

        if status.is_server_error() {
            error!(
                status = %status,
                duration_ms = duration.as_millis() as u64,
                response_size,
                "Request completed with server error"
            );
        } else if status.is_client_error() {
            warn!(
                status = %status,
                duration_ms = duration.as_millis() as u64,
                response_size,
                "Request completed with client error"
            );
        } else {
            info!(
                status = %status,
                duration_ms = duration.as_millis() as u64,
                response_size,
                "Request completed successfully"
            );
        }

        response
    }
    .instrument(span)
    .await
}

/// Identity of the caller for audit lines, once a route has authenticated it
pub fn caller_label(request: &Request) -> String {
    extract_identity(request)
        .map(|identity| format!("{}:{}", identity.id, identity.role))
        .unwrap_or_else(|| "anonymous".to_string())
}
