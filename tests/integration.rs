use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use drone_dispatch::api::rest::router;
use drone_dispatch::config::{Config, DbConfig, JwtConfig};
use drone_dispatch::state::AppState;
use drone_dispatch::store;
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret";

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        db: DbConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "drone_dispatch_test".to_string(),
        },
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            ttl_seconds: 3600,
            issuer: None,
            audience: None,
        },
    }
}

// The pool is lazy: routes that reject before touching storage exercise the
// full middleware and validation stack without a database.
fn setup() -> axum::Router {
    let config = test_config();
    let pool = store::connect(&config.db);
    let state = Arc::new(AppState::new(&config, pool));
    router(state)
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    name: String,
    role: String,
    iat: i64,
    exp: i64,
}

fn token(id: i64, name: &str, role: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = TestClaims {
        sub: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + 600,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {bearer}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_plain_ok() {
    let app = setup();
    let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app
        .oneshot(request("GET", "/metrics", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("connected_drones"));
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = setup();
    let response = app
        .oneshot(request("GET", "/admin/drones", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));

    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "missing/invalid bearer token");
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let app = setup();
    let response = app
        .oneshot(request("GET", "/admin/drones", Some("not-a-jwt"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "invalid token");
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let app = setup();

    let now = Utc::now().timestamp();
    let claims = TestClaims {
        sub: "1".to_string(),
        name: "ada".to_string(),
        role: "admin".to_string(),
        iat: now - 7200,
        exp: now - 3600,
    };
    let expired = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let response = app
        .oneshot(request("GET", "/admin/drones", Some(&expired), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "expired token");
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let app = setup();
    let enduser = token(7, "ada", "enduser");
    let response = app
        .oneshot(request("GET", "/admin/orders", Some(&enduser), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["message"], "role not allowed");
}

#[tokio::test]
async fn drone_cannot_break_another_drone() {
    let app = setup();
    let drone_a = token(1, "drone-a", "drone");
    let response = app
        .oneshot(request(
            "POST",
            "/drones/2/broken",
            Some(&drone_a),
            Some(json!({ "lat": 5.0, "lng": 5.0 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "drone_action_not_allowed");
}

#[tokio::test]
async fn create_order_rejects_out_of_range_latitude() {
    let app = setup();
    let enduser = token(7, "ada", "enduser");
    let response = app
        .oneshot(request(
            "POST",
            "/orders",
            Some(&enduser),
            Some(json!({
                "pickup_lat": 91.0,
                "pickup_lng": 1.0,
                "dropoff_lat": 2.0,
                "dropoff_lng": 2.0
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_latitude");
    assert_eq!(body["details"]["lat"], 91.0);
}

#[tokio::test]
async fn create_order_requires_all_coordinates() {
    let app = setup();
    let enduser = token(7, "ada", "enduser");
    let response = app
        .oneshot(request(
            "POST",
            "/orders",
            Some(&enduser),
            Some(json!({ "pickup_lat": 1.0, "pickup_lng": 1.0 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn non_numeric_order_id_is_rejected() {
    let app = setup();
    let enduser = token(7, "ada", "enduser");
    let response = app
        .oneshot(request("POST", "/orders/abc/cancel", Some(&enduser), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(body["message"], "invalid order id");
}

#[tokio::test]
async fn admin_order_list_rejects_bad_pagination() {
    let app = setup();
    let admin = token(1, "root", "admin");
    let response = app
        .oneshot(request(
            "GET",
            "/admin/orders?page=abc",
            Some(&admin),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_pagination");
}

#[tokio::test]
async fn admin_order_list_rejects_unknown_status_filter() {
    let app = setup();
    let admin = token(1, "root", "admin");
    let response = app
        .oneshot(request(
            "GET",
            "/admin/orders?status=in_transit",
            Some(&admin),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(body["message"], "invalid status");
}

#[tokio::test]
async fn route_patch_requires_complete_pairs() {
    let app = setup();
    let admin = token(1, "root", "admin");
    let response = app
        .oneshot(request(
            "PATCH",
            "/admin/orders/5",
            Some(&admin),
            Some(json!({ "pickup_lat": 3.0 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(body["message"], "pickup_lat and pickup_lng must both be provided");
}

#[tokio::test]
async fn token_endpoint_requires_name_and_password() {
    let app = setup();
    let response = app
        .oneshot(request(
            "POST",
            "/auth/token",
            None,
            Some(json!({ "name": "ada" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}
