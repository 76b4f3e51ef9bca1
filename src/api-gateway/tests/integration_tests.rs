//! Integration tests for the News Platform API Gateway
//!
//! Each test builds the complete router around mock backends and drives it with
//! `oneshot`, so requests run the same layers, route chains and proxy as in
//! production.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{any, header as header_eq, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use news_api_gateway::{
    build_router,
    services::{
        auth::{Role, TokenClaims},
        registry::{RouteDefinition, ServiceDefinition},
    },
    AppState, Config, GatewayError,
};

const SECRET: &str = "integration-test-secret";

/// Test helper to create a configuration around the given backends
fn test_config(services: Vec<ServiceDefinition>) -> Config {
    let mut config = Config::default();
    config.environment = "test".to_string();
    config.auth.jwt_secret = SECRET.to_string();
    config.routing.required_services = services.iter().map(|s| s.name.clone()).collect();
    config.routing.services = services;
    config
}

fn build_app(config: Config) -> Router {
    let state = AppState::new(config).expect("Failed to create test state");
    build_router(state).expect("Failed to build router")
}

fn auth_service(base_address: &str) -> ServiceDefinition {
    ServiceDefinition::new(
        "auth",
        base_address,
        vec![
            RouteDefinition::new("/login", false),
            RouteDefinition::new("/google", false),
            RouteDefinition::new("/profile", true),
        ],
    )
}

fn ml_service(base_address: &str) -> ServiceDefinition {
    ServiceDefinition::new(
        "ml",
        base_address,
        vec![
            RouteDefinition::new("/classify/predict", true).with_methods(&["POST"]),
            RouteDefinition::new("/train/models/:model_id", true)
                .with_methods(&["DELETE"])
                .with_roles(&[Role::Admin]),
        ],
    )
}

fn token(role: Role, expires_in: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
        id: 42,
        email: "reader@example.com".to_string(),
        role,
        iat: now - 60,
        exp: now + expires_in,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn bearer(role: Role) -> String {
    format!("Bearer {}", token(role, 3600))
}

/// Test helper to make HTTP requests to the gateway
async fn make_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: Option<HashMap<&str, &str>>,
) -> (StatusCode, HeaderMap, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);

    if let Some(headers) = headers {
        for (key, value) in headers {
            request_builder = request_builder.header(key, value);
        }
    }

    let request = if let Some(body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let body_json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, headers, body_json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_app(test_config(vec![]));

    let (status, _, body) = make_request(&app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "API Gateway running correctly");
    assert!(chrono::DateTime::parse_from_rfc3339(body["data"]["timestamp"].as_str().unwrap()).is_ok());
    assert!(body["data"]["uptime"].as_f64().unwrap() >= 0.0);
    assert_eq!(body["meta"], json!({}));
}

#[tokio::test]
async fn test_protected_route_without_token_never_reaches_backend() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![auth_service(&backend.uri())]));
    let (status, _, body) =
        make_request(&app, Method::GET, "/api/auth/profile", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "token not provided");
}

#[tokio::test]
async fn test_authenticated_request_is_forwarded_with_allowed_headers_only() {
    let backend = MockServer::start().await;
    let authorization = bearer(Role::Usuario);
    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header_eq("authorization", authorization.as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 42, "email": "reader@example.com"})),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![auth_service(&backend.uri())]));
    let headers = HashMap::from([
        ("Authorization", authorization.as_str()),
        ("User-Agent", "integration-test/1.0"),
        ("Cookie", "session=abc"),
        ("X-Internal-Token", "gateway-only"),
    ]);
    let (status, response_headers, body) =
        make_request(&app, Method::GET, "/api/auth/profile", None, Some(headers)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "reader@example.com");
    assert!(response_headers
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    assert!(response_headers.contains_key("x-request-id"));

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded = &received[0].headers;
    assert_eq!(forwarded.get("user-agent").unwrap(), "integration-test/1.0");
    assert!(forwarded.get("cookie").is_none());
    assert!(forwarded.get("x-internal-token").is_none());
    assert!(forwarded.get("x-request-id").is_none());
}

#[tokio::test]
async fn test_expired_and_invalid_tokens_are_distinguished() {
    let backend = MockServer::start().await;
    let app = build_app(test_config(vec![auth_service(&backend.uri())]));

    let expired = format!("Bearer {}", token(Role::Usuario, -120));
    let (status, _, body) = make_request(
        &app,
        Method::GET,
        "/api/auth/profile",
        None,
        Some(HashMap::from([("Authorization", expired.as_str())])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "token expired");

    let (status, _, body) = make_request(
        &app,
        Method::GET,
        "/api/auth/profile",
        None,
        Some(HashMap::from([("Authorization", "Bearer not-a-token")])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid token");
}

#[tokio::test]
async fn test_route_rate_limit_rejects_then_recovers() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
        .mount(&backend)
        .await;

    let auth = ServiceDefinition::new(
        "auth",
        backend.uri(),
        vec![RouteDefinition::new("/login", false).with_rate_limit(1000, 1)],
    );
    let app = build_app(test_config(vec![auth]));
    let credentials = json!({"email": "reader@example.com", "password": "secret"});

    let (status, headers, _) = make_request(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(credentials.clone()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["ratelimit-limit"], "1");
    assert_eq!(headers["ratelimit-remaining"], "0");

    let (status, headers, body) = make_request(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(credentials.clone()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
    assert_eq!(headers["ratelimit-limit"], "1");
    assert_eq!(headers["ratelimit-remaining"], "0");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("too many requests for this endpoint"));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let (status, _, _) = make_request(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(credentials),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_global_rate_limit_applies_before_routing() {
    let mut config = test_config(vec![]);
    config.rate_limiting.max_requests = 2;
    let app = build_app(config);

    for _ in 0..2 {
        let (status, headers, _) = make_request(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["ratelimit-limit"], "2");
    }

    let (status, _, body) =
        make_request(&app, Method::GET, "/api/unknown/anything", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("too many requests, try again in"));
}

#[tokio::test]
async fn test_downstream_redirect_is_relayed() {
    let backend = MockServer::start().await;
    let location = "https://accounts.example.com/o/oauth2/auth?client_id=abc&scope=email";
    Mock::given(method("GET"))
        .and(path("/api/auth/google"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", location))
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![auth_service(&backend.uri())]));
    let (status, headers, _) =
        make_request(&app, Method::GET, "/api/auth/google", None, None).await;

    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], location);
}

#[tokio::test]
async fn test_downstream_error_message_passes_through() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad credentials"})))
        .mount(&backend)
        .await;

    let mut config = test_config(vec![auth_service(&backend.uri())]);
    config.environment = "production".to_string();
    let app = build_app(config);

    let (status, _, body) = make_request(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({"email": "reader@example.com", "password": "wrong"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"status": "error", "message": "bad credentials"}));
}

#[tokio::test]
async fn test_stack_is_attached_outside_production() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "database down"})))
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![auth_service(&backend.uri())]));
    let (status, _, body) = make_request(&app, Method::GET, "/api/auth/google", None, None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "database down");
    assert!(body["stack"].as_str().unwrap().contains("Downstream"));
}

#[tokio::test]
async fn test_unreachable_backend_is_service_unavailable() {
    // Reserve a port, then release it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let app = build_app(test_config(vec![ml_service(&address)]));
    let authorization = bearer(Role::Usuario);
    let (status, _, body) = make_request(
        &app,
        Method::POST,
        "/api/ml/classify/predict",
        Some(json!({"text": "headline"})),
        Some(HashMap::from([("Authorization", authorization.as_str())])),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("not available"));
    assert_ne!(message, "invalid token");
}

#[tokio::test]
async fn test_backend_timeout_is_bad_gateway() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&backend)
        .await;

    let mut config = test_config(vec![ml_service(&backend.uri())]);
    config.routing.upstream_timeout_seconds = 1;
    let app = build_app(config);

    let authorization = bearer(Role::Usuario);
    let (status, _, body) = make_request(
        &app,
        Method::POST,
        "/api/ml/classify/predict",
        Some(json!({"text": "headline"})),
        Some(HashMap::from([("Authorization", authorization.as_str())])),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body["message"],
        "bad gateway: error communicating with service ml"
    );
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let app = build_app(test_config(vec![]));

    let (status, _, body) =
        make_request(&app, Method::GET, "/api/unknown/anything?x=1", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("/api/unknown/anything?x=1"));
}

#[tokio::test]
async fn test_path_parameters_and_query_are_preserved() {
    let backend = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/ml/train/models/model-7"))
        .and(query_param("force", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": "model-7"})))
        .expect(1)
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![ml_service(&backend.uri())]));
    let authorization = bearer(Role::Admin);
    let (status, _, body) = make_request(
        &app,
        Method::DELETE,
        "/api/ml/train/models/model-7?force=true&reason=a%20b",
        None,
        Some(HashMap::from([("Authorization", authorization.as_str())])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], "model-7");

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received[0].url.query(), Some("force=true&reason=a%20b"));
}

#[tokio::test]
async fn test_role_gate_rejects_insufficient_role() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let app = build_app(test_config(vec![ml_service(&backend.uri())]));
    let authorization = bearer(Role::Usuario);
    let (status, _, body) = make_request(
        &app,
        Method::DELETE,
        "/api/ml/train/models/model-7",
        None,
        Some(HashMap::from([("Authorization", authorization.as_str())])),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "forbidden: insufficient permissions for this resource"
    );
}

#[tokio::test]
async fn test_undeclared_method_is_not_found() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;
    let app = build_app(test_config(vec![ml_service(&backend.uri())]));

    let (status, headers, body) =
        make_request(&app, Method::GET, "/api/ml/classify/predict", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!headers.contains_key(header::ALLOW));
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("/api/ml/classify/predict"));
}

#[tokio::test]
async fn test_spoofed_forwarded_for_does_not_reset_route_limit() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
        .mount(&backend)
        .await;

    let auth = ServiceDefinition::new(
        "auth",
        backend.uri(),
        vec![RouteDefinition::new("/login", false).with_rate_limit(60_000, 1)],
    );
    let config = test_config(vec![auth]);
    assert!(!config.rate_limiting.trust_proxy_headers);
    let app = build_app(config);

    let mut statuses = Vec::new();
    for i in 1..=3 {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header("Content-Type", "application/json")
            .header("x-forwarded-for", format!("10.0.0.{}", i))
            .body(Body::from(r#"{"email":"reader@example.com"}"#))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 40000))));

        let response = app.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let mut config = test_config(vec![auth_service(&backend.uri())]);
    config.server.max_body_bytes = 16;
    let app = build_app(config);

    let (status, _, body) = make_request(
        &app,
        Method::POST,
        "/api/auth/login",
        Some(json!({"email": "someone-with-a-long-address@example.com"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_missing_required_service_prevents_startup() {
    let mut config = test_config(vec![auth_service("http://localhost:3001")]);
    config.routing.required_services.push("notifications".to_string());

    let err = AppState::new(config).err().unwrap();
    assert!(matches!(err, GatewayError::Configuration(_)));
    assert!(err.to_string().contains("notifications"));
}
