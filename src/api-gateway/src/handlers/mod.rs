//! HTTP handlers for gateway-originated responses

pub mod health;

use axum::http::Uri;

use crate::error::GatewayError;

/// Fallback for every path no route binding matched
pub async fn not_found(uri: Uri) -> GatewayError {
    let requested = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or_else(|| uri.path());
    GatewayError::not_found(requested)
}
