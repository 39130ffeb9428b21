use crate::api::errors::ApiError;
use crate::api::stats;
use crate::ingest::handler::{collect_event, AppState};
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Permissive CORS for the collector (tracking snippet runs on any origin)
    let ingestion_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let dashboard_cors = build_dashboard_cors(state.dashboard_origin.as_deref());

    let site_routes = Router::new()
        .route("/sites/{site_id}/metrics", get(stats::get_metrics))
        .route("/sites/{site_id}/visitors", get(stats::get_visitors))
        .route("/sites/{site_id}/pages", get(stats::get_pages))
        .route("/sites/{site_id}/referrers", get(stats::get_referrers))
        .layer(dashboard_cors);

    // 64 KB body limit; a maximal valid event is well under 8 KB
    let ingestion_routes = Router::new()
        .route("/collect", post(collect_event))
        .layer(DefaultBodyLimit::max(65_536))
        .layer(ingestion_cors);

    let api_routes = Router::new().merge(ingestion_routes).merge(site_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inject OWASP-recommended security headers on every HTTP response.
async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Build CORS layer for the read routes based on configured origin.
fn build_dashboard_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);
    match dashboard_origin.map(str::parse::<HeaderValue>) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            tracing::warn!("Invalid dashboard_origin; read routes allow no cross-origin access");
            cors
        }
        // No dashboard origin configured: allow all origins
        None => cors.allow_origin(Any),
    }
}

/// GET /health: Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed: Health check with buffer state.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "buffered_events": state.buffer.len(),
    }))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::DuckDbEventStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use duckdb::Connection;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    fn make_test_state(dashboard_origin: Option<&str>) -> Arc<AppState> {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::migrations::run_migrations(&conn).unwrap();
        let store = DuckDbEventStore::new(Arc::new(Mutex::new(conn)));
        let mut state = AppState::new(store, 1000, "test-secret".to_string());
        state.dashboard_origin = dashboard_origin.map(str::to_string);
        Arc::new(state)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_detailed_health_check() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/detailed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("version").is_some());
        assert_eq!(json["buffered_events"], 0);
    }

    #[tokio::test]
    async fn test_security_headers() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert!(headers.contains_key("referrer-policy"));
    }

    #[tokio::test]
    async fn test_collect_event() {
        let state = make_test_state(None);
        let app = build_router(Arc::clone(&state));

        let payload = serde_json::json!({
            "site_id": "example.com",
            "session_id": "s1",
            "event_type": "pageview",
            "url": "https://example.com/",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_collect_invalid_payload() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Missing required fields are rejected by Axum's Json extractor
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_collect_empty_session() {
        let app = build_router(make_test_state(None));

        let payload = serde_json::json!({
            "site_id": "example.com",
            "session_id": "",
            "url": "https://example.com/",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_collect_control_char_session() {
        let state = make_test_state(None);
        let app = build_router(Arc::clone(&state));

        let payload = serde_json::json!({
            "site_id": "example.com",
            "session_id": "\u{1}\u{2}",
            "url": "https://example.com/",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/collect")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.buffer.len(), 0);
    }

    #[tokio::test]
    async fn test_metrics_empty() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sites/test.com/metrics?period=30d")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["visitors"], 0);
        assert_eq!(json["bounce_rate"], 0.0);
        assert!(json.get("changes").is_none());
    }

    #[tokio::test]
    async fn test_not_found() {
        let app = build_router(make_test_state(None));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nonexistent.file")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_cors_headers_on_collect() {
        let app = build_router(make_test_state(Some("https://dash.example.com")));

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/collect")
                    .header("origin", "https://example.com")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_cors_restricted_on_read_routes() {
        let app = build_router(make_test_state(Some("https://dash.example.com")));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sites/test.com/metrics")
                    .header("origin", "https://dash.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://dash.example.com"
        );
    }
}
