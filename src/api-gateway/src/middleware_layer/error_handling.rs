//! Error translation middleware
//!
//! The terminal fault boundary of the gateway. Every error response leaves through
//! here exactly once: errors raised as [`GatewayError`] carry an [`ErrorReport`]
//! and are logged and, outside production, re-rendered with their stack. Error
//! responses produced by the framework itself (extractor rejections) are wrapped
//! into the same envelope.

use std::any::Any;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::{
    error::{ErrorReport, GatewayError},
    response::ErrorEnvelope,
    state::AppState,
};

/// Framework error bodies longer than this are replaced by the status reason.
const MAX_FRAMEWORK_MESSAGE_LEN: usize = 512;

/// Log and normalize every error response
pub async fn error_translator_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let context = RequestContext {
        method: &method,
        path: &path,
        request_id: &request_id,
    };

    match response.extensions().get::<ErrorReport>().cloned() {
        Some(report) => {
            log_error(&context, &report);
            if state.config.is_production() {
                response
            } else {
                let envelope = ErrorEnvelope::new(report.message).with_stack(report.stack);
                replace_body(response, &envelope)
            }
        }
        None => wrap_framework_error(&context, response, !state.config.is_production()).await,
    }
}

/// Response for a panic caught by `CatchPanicLayer`
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %detail, "Panic occurred in request handler");
    GatewayError::internal(format!("panic: {}", detail)).into_response()
}

struct RequestContext<'a> {
    method: &'a Method,
    path: &'a str,
    request_id: &'a str,
}

fn log_error(context: &RequestContext<'_>, report: &ErrorReport) {
    if report.status.is_server_error() {
        error!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            status = report.status.as_u16(),
            error_type = report.error_type,
            detail = %report.stack,
            "{}",
            report.message
        );
    } else {
        warn!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            status = report.status.as_u16(),
            error_type = report.error_type,
            "{}",
            report.message
        );
    }
}

async fn wrap_framework_error(
    context: &RequestContext<'_>,
    response: Response,
    with_stack: bool,
) -> Response {
    let status = response.status();
    let (parts, body) = response.into_parts();

    let text = axum::body::to_bytes(body, MAX_FRAMEWORK_MESSAGE_LEN)
        .await
        .ok()
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let message = text.unwrap_or_else(|| default_message(status));
    let report = ErrorReport {
        status,
        error_type: "framework_error",
        message: message.clone(),
        stack: status.to_string(),
    };
    log_error(context, &report);

    let mut envelope = ErrorEnvelope::new(message);
    if with_stack {
        envelope = envelope.with_stack(report.stack.clone());
    }

    let mut response = Response::from_parts(parts, Body::empty());
    response.extensions_mut().insert(report);
    replace_body(response, &envelope)
}

fn default_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(|reason| reason.to_ascii_lowercase())
        .unwrap_or_else(|| format!("request failed with status code {}", status.as_u16()))
}

fn replace_body(response: Response, envelope: &ErrorEnvelope) -> Response {
    let body = match serde_json::to_vec(envelope) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to serialize error envelope");
            return response;
        }
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Response::from_parts(parts, Body::from(body))
}
