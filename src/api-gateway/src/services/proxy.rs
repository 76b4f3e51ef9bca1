//! Reverse proxy to backend services
//!
//! Forwards one request to its backend and maps the outcome onto the client
//! response. Redirects are never followed and every downstream status is data,
//! so the mapping below is the single place deciding how backend results look to
//! clients. No retries, no caching.

use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, USER_AGENT},
        HeaderMap, HeaderName, Method, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use reqwest::{redirect, Client};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::RoutingConfig;
use crate::error::{GatewayError, Result};

/// Inbound headers copied to the backend; everything else is dropped.
pub const FORWARDED_HEADERS: [HeaderName; 3] = [AUTHORIZATION, USER_AGENT, CONTENT_TYPE];

/// Backend message fields, in the order they are tried.
const MESSAGE_FIELDS: [&str; 3] = ["message", "error", "status"];

const MAX_TEXT_MESSAGE_LEN: usize = 1024;

/// A resolved backend a route forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub base_address: String,
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, base_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_address: base_address.into(),
        }
    }

    fn prefix(&self) -> String {
        format!("/api/{}", self.name)
    }

    /// `<base>/api/<name><path relative to the prefix>[?query]`
    pub fn target_url(&self, uri: &Uri) -> String {
        let prefix = self.prefix();
        let relative = uri.path().strip_prefix(prefix.as_str()).unwrap_or(uri.path());

        let mut url = format!("{}{}{}", self.base_address, prefix, relative);
        if let Some(query) = uri.query() {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Reconstructed downstream request
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub target_url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw downstream response
#[derive(Debug)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Reverse proxy holding the shared outbound HTTP client
#[derive(Clone)]
pub struct ReverseProxy {
    client: Client,
    max_body_bytes: usize,
}

impl ReverseProxy {
    pub fn new(routing: &RoutingConfig, max_body_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(routing.connect_timeout_seconds))
            .timeout(Duration::from_secs(routing.upstream_timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    /// Forward `request` to `target` and relay the outcome.
    pub async fn forward(&self, target: &ServiceTarget, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body = read_body(body, self.max_body_bytes).await?;

        let outbound = ProxyRequest {
            target_url: target.target_url(&parts.uri),
            headers: select_headers(&parts.headers),
            method: parts.method,
            body,
        };

        debug!(
            service = %target.name,
            method = %outbound.method,
            target_url = %outbound.target_url,
            "Proxying request"
        );

        let downstream = self.send(&target.name, outbound).await?;

        debug!(
            service = %target.name,
            status = %downstream.status,
            "Downstream responded"
        );

        relay(downstream)
    }

    async fn send(&self, service: &str, outbound: ProxyRequest) -> Result<DownstreamResponse> {
        let mut builder = self
            .client
            .request(outbound.method, &outbound.target_url)
            .headers(outbound.headers);
        if !outbound.body.is_empty() {
            builder = builder.body(outbound.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_failure(service, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_failure(service, e))?;

        Ok(DownstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Copy only the allow-listed headers.
pub fn select_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS.iter() {
        if let Some(value) = inbound.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers
}

/// Map a downstream response onto the client response.
pub fn relay(downstream: DownstreamResponse) -> Result<Response> {
    if downstream.status.is_redirection() {
        if let Some(location) = downstream.headers.get(LOCATION) {
            return Ok((StatusCode::FOUND, [(LOCATION, location.clone())]).into_response());
        }
    }

    if downstream.status.is_client_error() || downstream.status.is_server_error() {
        let message = extract_error_message(&downstream.body, downstream.status);
        return Err(GatewayError::downstream(downstream.status, message));
    }

    let mut response = (downstream.status, Body::from(downstream.body)).into_response();
    if let Some(content_type) = downstream.headers.get(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }
    Ok(response)
}

/// Pick the client-facing message out of a backend error body: `message`, then
/// `error`, then `status` of a JSON object; a bare JSON or text string; otherwise
/// the transport's generic message.
pub fn extract_error_message(body: &[u8], status: StatusCode) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            for field in MESSAGE_FIELDS {
                match fields.get(field) {
                    Some(Value::String(text)) if !text.is_empty() => return text.clone(),
                    Some(Value::Number(number)) if field == "status" => return number.to_string(),
                    _ => {}
                }
            }
        }
        Ok(Value::String(text)) if !text.is_empty() => return text,
        Ok(_) => {}
        Err(_) => {
            if let Ok(text) = std::str::from_utf8(body) {
                let text = text.trim();
                if !text.is_empty() && text.len() <= MAX_TEXT_MESSAGE_LEN {
                    return text.to_string();
                }
            }
        }
    }

    format!("request failed with status code {}", status.as_u16())
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        if inner.is::<LengthLimitError>() {
            GatewayError::PayloadTooLarge { max_size: limit }
        } else {
            GatewayError::bad_request(inner.to_string())
        }
    })
}

/// Connection refused means the backend process is not listening: 503.
/// Anything else the transport could not complete is a 502.
fn transport_failure(service: &str, error: reqwest::Error) -> GatewayError {
    if is_connection_refused(&error) {
        error!(service = %service, error = %error, "Service not available");
        GatewayError::service_unavailable(service, error.to_string())
    } else {
        warn!(service = %service, error = %error, "Proxy request failed");
        GatewayError::bad_gateway(service, error.to_string())
    }
}

fn is_connection_refused(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn ml() -> ServiceTarget {
        ServiceTarget::new("ml", "http://localhost:5000")
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let uri: Uri = "/api/ml/train/models/42/activate?force=true&x=a%20b"
            .parse()
            .unwrap();
        assert_eq!(
            ml().target_url(&uri),
            "http://localhost:5000/api/ml/train/models/42/activate?force=true&x=a%20b"
        );

        let uri: Uri = "/api/ml/classify/stats".parse().unwrap();
        assert_eq!(
            ml().target_url(&uri),
            "http://localhost:5000/api/ml/classify/stats"
        );
    }

    #[test]
    fn test_select_headers_uses_allow_list() {
        let mut inbound = HeaderMap::new();
        inbound.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        inbound.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        inbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inbound.insert("x-request-id", HeaderValue::from_static("123"));
        inbound.insert("cookie", HeaderValue::from_static("session=1"));

        let forwarded = select_headers(&inbound);
        assert_eq!(forwarded.len(), 3);
        assert_eq!(forwarded[AUTHORIZATION], "Bearer abc");
        assert!(forwarded.get("x-request-id").is_none());
        assert!(forwarded.get("cookie").is_none());
    }

    #[test]
    fn test_extraction_priority() {
        let status = StatusCode::BAD_REQUEST;
        let body = json!({"message": "m", "error": "e", "status": "s"}).to_string();
        assert_eq!(extract_error_message(body.as_bytes(), status), "m");

        let body = json!({"error": "bad credentials", "status": "error"}).to_string();
        assert_eq!(extract_error_message(body.as_bytes(), status), "bad credentials");

        let body = json!({"message": "", "status": "failed"}).to_string();
        assert_eq!(extract_error_message(body.as_bytes(), status), "failed");

        let body = json!({"status": 418}).to_string();
        assert_eq!(extract_error_message(body.as_bytes(), status), "418");
    }

    #[test]
    fn test_extraction_fallbacks() {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(extract_error_message(b"\"plain\"", status), "plain");
        assert_eq!(extract_error_message(b"upstream exploded\n", status), "upstream exploded");
        assert_eq!(
            extract_error_message(b"", status),
            "request failed with status code 500"
        );
        assert_eq!(
            extract_error_message(json!({"detail": "x"}).to_string().as_bytes(), status),
            "request failed with status code 500"
        );
        assert_eq!(
            extract_error_message(json!([1, 2]).to_string().as_bytes(), status),
            "request failed with status code 500"
        );
    }

    #[test]
    fn test_relay_redirect() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LOCATION,
            HeaderValue::from_static("https://accounts.example.com/o/oauth2?state=x"),
        );
        let response = relay(DownstreamResponse {
            status: StatusCode::MOVED_PERMANENTLY,
            headers,
            body: Bytes::from_static(b"ignored"),
        })
        .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[LOCATION],
            "https://accounts.example.com/o/oauth2?state=x"
        );
    }

    #[test]
    fn test_relay_redirect_without_location_is_mirrored() {
        let response = relay(DownstreamResponse {
            status: StatusCode::NOT_MODIFIED,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
        .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_relay_error_becomes_downstream_error() {
        let err = relay(DownstreamResponse {
            status: StatusCode::UNAUTHORIZED,
            headers: HeaderMap::new(),
            body: Bytes::from(json!({"error": "bad credentials"}).to_string()),
        })
        .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "bad credentials");
    }
}
