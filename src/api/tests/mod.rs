use super::*;
use crate::test_helpers::{RecordingDispatcher, create_test_control};
use crate::types::JobRecord;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for oneshot()


/// Router over a test control plane with a recording dispatcher and bases `kb-1`/`kb-2`
async fn create_test_app() -> (Router, Arc<CrawlControl>, Arc<RecordingDispatcher>, TempDir) {
    let (control, dispatcher, temp_dir) = create_test_control().await;
    let control = Arc::new(control);
    let config = control.get_config();
    let app = create_router(control.clone(), config);
    (app, control, dispatcher, temp_dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_record(response: axum::response::Response) -> JobRecord {
    serde_json::from_value(body_json(response).await).unwrap()
}

/// Start a job for `base_id` through the router
async fn start_job(app: &Router, base_id: &str) -> JobRecord {
    let response = app
        .clone()
        .oneshot(post_json(
            "/jobs",
            serde_json::json!({ "baseId": base_id, "config": { "depth": 2 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_record(response).await
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (control, _dispatcher, _temp_dir) = create_test_control().await;

    // Port 0 = OS assigns a free port
    let mut config = (*control.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let control = Arc::new(control);
        async move { start_api_server(control, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be serving");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (_app, control, _dispatcher, _temp_dir) = create_test_app().await;

    let mut config = (*control.get_config()).clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(control, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_restricted_origins() {
    let (_app, control, _dispatcher, _temp_dir) = create_test_app().await;

    let mut config = (*control.get_config()).clone();
    config.api.cors_origins = vec!["http://allowed.example".to_string()];
    let app = create_router(control, Arc::new(config));

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://allowed.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "http://allowed.example"
    );

    let denied = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://other.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(
        !denied
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (_app, control, _dispatcher, _temp_dir) = create_test_app().await;

    let mut config = (*control.get_config()).clone();
    config.api.cors_enabled = false;
    let app = create_router(control, Arc::new(config));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    let (app, control, _dispatcher, _temp_dir) = create_test_app().await;

    // The document Swagger UI loads is served by the same router
    let response = app.oneshot(get(SWAGGER_DOC_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/jobs/{id}"].is_object());
    assert_eq!(json["servers"][0]["url"], "http://localhost:6790");

    let mut config = (*control.get_config()).clone();
    config.api.swagger_ui = false;
    let app = create_router(control, Arc::new(config));
    let response = app.oneshot(get(SWAGGER_DOC_PATH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
