//! Integration tests for the `/health` route — verifies the router wiring
//! and observable-state snapshot shape (§6.4).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use voxd_server::bootstrap::{bootstrap, CorsConfig};
use voxd_server::create_router;
use voxd_core::config::AppConfig;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.thermal.enabled = false;
    config
}

#[tokio::test]
async fn health_endpoint_returns_a_populated_snapshot() {
    let ctx = bootstrap(test_config()).await.expect("bootstrap should succeed");
    let app = create_router(ctx, &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert!(json.get("thermal").is_some());
    assert!(json.get("sessions").is_some());
    assert!(json.get("pipeline").is_some());
    assert!(json["workers"].as_array().is_some_and(|w| !w.is_empty()));
    assert_eq!(json["thermal"]["supported"], false);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let ctx = bootstrap(test_config()).await.expect("bootstrap should succeed");
    let app = create_router(ctx, &CorsConfig::AllowAll);

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
