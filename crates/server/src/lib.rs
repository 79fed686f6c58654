// crates/server/src/lib.rs
//! novel-dl server library.
//!
//! Axum control surface and WebSocket push channel over the download task
//! core: admission, dispatch to an in-process worker pool, and owner-scoped
//! task notifications.

pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes and the /ws push channel
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use novel_dl_core::{ContentEnvelope, SourceError, UnitRef, UnitSource};
    use novel_dl_db::Database;
    use tower::ServiceExt;

    struct NoSource;

    #[async_trait]
    impl UnitSource for NoSource {
        async fn list_units(&self, _resource_id: i64) -> Result<Vec<UnitRef>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_unit(&self, _unit_id: &str) -> Result<ContentEnvelope, SourceError> {
            Err(SourceError::Timeout)
        }
    }

    async fn app() -> Router {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        let state = AppState::new(db, &config::ServerConfig::default(), Arc::new(NoSource));
        create_app(state)
    }

    /// Helper to make a request to the app.
    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    // ========================================================================
    // Health Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = send(app().await, "GET", "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"uptime_secs\""));
        assert!(body.contains("\"jobs\":{\"in_flight\":0,\"queued\":0,\"accepting\":true}"));
        assert!(body.contains("\"connected_clients\":0"));
    }

    // ========================================================================
    // Task Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_list_tasks_empty() {
        let (status, body) = send(app().await, "GET", "/api/tasks/list").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"tasks":[]}"#);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let app = app().await;
        let (status, _) = send(app.clone(), "POST", "/api/tasks/99/terminate").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(app.clone(), "POST", "/api/tasks/99/redownload").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(app.clone(), "DELETE", "/api/tasks/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(app, "GET", "/api/tasks/status/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Execution not found"));
    }

    #[tokio::test]
    async fn test_unknown_novel_is_404() {
        let app = app().await;
        let (status, body) = send(app.clone(), "GET", "/api/novels/7").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Novel with ID 7 not found"));
        let (status, _) = send(app, "GET", "/api/novels/7/chapters").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_not_found_route() {
        let (status, _) = send(app().await, "GET", "/api/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/health")
                    .header("Origin", "http://localhost:3000")
                    .header("Access-Control-Request-Method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
