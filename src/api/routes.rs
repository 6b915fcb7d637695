//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, delete_matched_handler, get_handler, get_many_handler,
    health_handler, increment_handler, set_handler, set_many_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/set_many", post(set_many_handler))
        .route("/get/:key", get(get_handler))
        .route("/get_many", post(get_many_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/incr/:key", post(increment_handler))
        .route("/clear", post(clear_handler))
        .route("/delete_matched", post(delete_matched_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let config = Config {
            clusters: "a,b;c".to_string(),
            rng_seed: Some(4),
            ..Config::default()
        };
        create_router(AppState::from_config(&config).unwrap())
    }

    async fn status(app: &Router, method: Method, uri: &str, body: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_every_route_is_mounted() {
        let app = create_test_app();
        let routes = [
            (Method::PUT, "/set", r#"{"key":"k","value":"v"}"#),
            (Method::POST, "/set_many", r#"{"entries":[]}"#),
            (Method::GET, "/get/k", ""),
            (Method::POST, "/get_many", r#"{"keys":["k"]}"#),
            (Method::DELETE, "/del/k", ""),
            (Method::POST, "/incr/n", ""),
            (Method::POST, "/clear", ""),
            (Method::POST, "/delete_matched", r#"{"pattern":"k%"}"#),
            (Method::GET, "/stats", ""),
            (Method::GET, "/health", ""),
        ];

        for (method, uri, body) in routes {
            let code = status(&app, method.clone(), uri, body).await;
            assert_eq!(code, StatusCode::OK, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let app = create_test_app();
        let code = status(&app, Method::GET, "/clear", "").await;
        assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_test_app();
        let code = status(&app, Method::GET, "/keys", "").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
