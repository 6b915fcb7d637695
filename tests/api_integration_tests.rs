//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shardcache::{api::create_router, AppState, Config};
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> Router {
    let config = Config {
        clusters: "alpha,beta,gamma".to_string(),
        rng_seed: Some(11),
        ..Config::default()
    };
    create_router(AppState::from_config(&config).unwrap())
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "test_key", "value": "test_value"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["stored"], true);
}

#[tokio::test]
async fn test_set_many_endpoint() {
    let app = create_test_app();

    let entries: Vec<Value> = (0..20)
        .map(|i| json!({"key": format!("user:{}", i), "value": format!("name{}", i)}))
        .collect();
    let (status, json) = send(&app, "POST", "/set_many", Some(json!({ "entries": entries }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 20);

    let (_, json) = send(&app, "GET", "/get/user:7", None).await;
    assert_eq!(json["value"], "name7");
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_success() {
    let app = create_test_app();
    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "get_key", "value": "get_value"})),
    )
    .await;

    let (status, json) = send(&app, "GET", "/get/get_key", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "get_key");
    assert_eq!(json["value"], "get_value");
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/get/nonexistent", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn test_get_many_skips_missing_keys() {
    let app = create_test_app();
    send(
        &app,
        "POST",
        "/set_many",
        Some(json!({"entries": [
            {"key": "a", "value": "1"},
            {"key": "b", "value": "2"}
        ]})),
    )
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/get_many",
        Some(json!({"keys": ["a", "b", "c"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["values"], json!({"a": "1", "b": "2"}));
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint() {
    let app = create_test_app();
    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "delete_key", "value": "v"})),
    )
    .await;

    let (status, json) = send(&app, "DELETE", "/del/delete_key", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], true);

    let (status, json) = send(&app, "DELETE", "/del/delete_key", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], false);

    let (status, _) = send(&app, "GET", "/get/delete_key", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// == INCR Endpoint Tests ==

#[tokio::test]
async fn test_increment_endpoint() {
    let app = create_test_app();

    let (status, json) = send(&app, "POST", "/incr/counter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], 1);

    let (_, json) = send(&app, "POST", "/incr/counter", Some(json!({"amount": 41}))).await;
    assert_eq!(json["value"], 42);

    let (_, json) = send(&app, "POST", "/incr/counter", Some(json!({"amount": -50}))).await;
    assert_eq!(json["value"], -8);

    let (_, json) = send(&app, "GET", "/get/counter", None).await;
    assert_eq!(json["value"], "-8");
}

#[tokio::test]
async fn test_increment_non_integer_value() {
    let app = create_test_app();
    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "word", "value": "hello"})),
    )
    .await;

    let (status, json) = send(&app, "POST", "/incr/word", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

// == CLEAR / DELETE_MATCHED Endpoint Tests ==

#[tokio::test]
async fn test_delete_matched_endpoint() {
    let app = create_test_app();
    let entries: Vec<Value> = ["session:1", "session:2", "session:3", "user:1"]
        .iter()
        .map(|k| json!({"key": k, "value": "x"}))
        .collect();
    send(&app, "POST", "/set_many", Some(json!({ "entries": entries }))).await;

    let (status, json) = send(
        &app,
        "POST",
        "/delete_matched",
        Some(json!({"pattern": "session:%"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], 3);

    let (status, _) = send(&app, "GET", "/get/user:1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/get/session:2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_matched_rejects_leading_wildcard() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/delete_matched",
        Some(json!({"pattern": "%session"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("wildcard"));
}

#[tokio::test]
async fn test_clear_endpoint() {
    let app = create_test_app();
    for i in 0..10 {
        send(
            &app,
            "PUT",
            "/set",
            Some(json!({"key": format!("k{}", i), "value": "v"})),
        )
        .await;
    }

    let (status, json) = send(&app, "POST", "/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("message").is_some());

    let (_, json) = send(&app, "GET", "/stats", None).await;
    for shard in json["clusters"][0]["shards"].as_array().unwrap() {
        assert_eq!(shard["entries"], 0);
    }
}

// == STATS Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();

    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "stats_key", "value": "stats_value"})),
    )
    .await;
    send(&app, "GET", "/get/stats_key", None).await;
    send(&app, "GET", "/get/nonexistent", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"].as_u64().unwrap(), 1);
    assert_eq!(json["misses"].as_u64().unwrap(), 1);
    assert_eq!(json["hit_rate"].as_f64().unwrap(), 0.5);

    let cluster = &json["clusters"][0];
    assert_eq!(cluster["asynchronous"], false);
    let shards = cluster["shards"].as_array().unwrap();
    assert_eq!(shards.len(), 3);
    let entries: u64 = shards.iter().map(|s| s["entries"].as_u64().unwrap()).sum();
    assert_eq!(entries, 1);
    assert_eq!(shards[0]["max_age"].as_i64().unwrap(), 14 * 24 * 60 * 60);
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"].as_str().unwrap(), "healthy");
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn test_health_over_tcp() {
    let app = create_test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "healthy");
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/set")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"invalid json"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Axum returns 422 for JSON parsing errors by default
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_key_request() {
    let app = create_test_app();

    let (status, json) = send(&app, "PUT", "/set", Some(json!({"key": "", "value": "test"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_oversized_key_request() {
    let app = create_test_app();
    let key = "k".repeat(1025);

    let (status, _) = send(&app, "PUT", "/set", Some(json!({"key": key, "value": "v"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
