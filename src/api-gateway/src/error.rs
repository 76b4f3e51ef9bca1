//! Error handling for the API Gateway
//!
//! Every failure inside the gateway is a [`GatewayError`]. Converting one into a
//! response produces the uniform `{status: "error", message}` envelope and tags the
//! response with an [`ErrorReport`] so the error translator can log it and attach
//! the stack outside production.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::middleware_layer::rate_limit::add_rate_limit_headers;
use crate::response::ErrorEnvelope;
use crate::services::{auth::TokenError, rate_limiter::RateLimitDecision};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the API Gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Authentication(#[from] TokenError),

    #[error("forbidden: insufficient permissions for this resource")]
    Authorization,

    #[error("route not found: {path}")]
    NotFound { path: String },

    #[error("invalid request body: {message}")]
    BadRequest { message: String },

    #[error("request body too large: maximum is {max_size} bytes")]
    PayloadTooLarge { max_size: usize },

    #[error("{message}")]
    RateLimited {
        message: String,
        decision: RateLimitDecision,
    },

    #[error("service unavailable: {service} is not available at this time")]
    ServiceUnavailable { service: String, detail: String },

    #[error("bad gateway: error communicating with service {service}")]
    BadGateway { service: String, detail: String },

    /// A backend answered with an error status; its status and message pass through.
    #[error("{message}")]
    Downstream { status: StatusCode, message: String },

    #[error("internal server error")]
    Internal { detail: String },
}

/// Diagnostic record attached to every error response for the error translator.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub error_type: &'static str,
    pub message: String,
    pub stack: String,
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, decision: RateLimitDecision) -> Self {
        Self::RateLimited {
            message: message.into(),
            decision,
        }
    }

    pub fn service_unavailable(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_gateway(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadGateway {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn downstream(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Downstream {
            status,
            message: message.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Authorization => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Downstream { status, .. } => *status,
            GatewayError::Configuration(_) | GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string used in logs
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::HttpClient(_) => "http_client_error",
            GatewayError::Authentication(_) => "authentication_error",
            GatewayError::Authorization => "authorization_error",
            GatewayError::NotFound { .. } => "not_found_error",
            GatewayError::BadRequest { .. } => "validation_error",
            GatewayError::PayloadTooLarge { .. } => "request_too_large_error",
            GatewayError::RateLimited { .. } => "rate_limit_error",
            GatewayError::ServiceUnavailable { .. } => "service_unavailable_error",
            GatewayError::BadGateway { .. } => "bad_gateway_error",
            GatewayError::Downstream { .. } => "downstream_error",
            GatewayError::Internal { .. } => "internal_error",
        }
    }

    /// Debug representation followed by the chain of underlying causes.
    pub fn stack(&self) -> String {
        let mut stack = format!("{:?}", self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            stack.push_str("\n  caused by: ");
            stack.push_str(&cause.to_string());
            source = cause.source();
        }
        stack
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status_code(),
            error_type: self.error_type(),
            message: self.to_string(),
            stack: self.stack(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let report = self.report();

        let mut response =
            (report.status, Json(ErrorEnvelope::new(report.message.clone()))).into_response();

        if let GatewayError::RateLimited { decision, .. } = &self {
            let headers = response.headers_mut();
            add_rate_limit_headers(headers, decision);
            headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
        }

        response.extensions_mut().insert(report);
        response
    }
}
