//! HTTP surface tests, driving the router directly.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hookline::ingest::Ingress;
use hookline::pipeline::processing::SimulatedProcessor;
use hookline::pipeline::{Pipeline, PipelineConfig, PipelineHandle};
use hookline::server::{AppState, router};
use hookline::shutdown::ShutdownCoordinator;
use serde_json::Value;
use tower::ServiceExt;

fn start() -> (PipelineHandle, ShutdownCoordinator, axum::Router) {
    let pipeline = Pipeline::start(
        PipelineConfig::default(),
        SimulatedProcessor::new(Duration::ZERO, 8),
    )
    .expect("pipeline should start");
    let coordinator = ShutdownCoordinator::new();
    let app = router(AppState {
        ingress: Ingress::new(&pipeline, coordinator.clone()),
    });
    (pipeline, coordinator, app)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response should be JSON")
}

#[tokio::test]
async fn root_reports_ok() {
    let (_pipeline, _coordinator, app) = start();

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn webhook_accepts_well_formed_registration() {
    let (pipeline, _coordinator, app) = start();

    let response = app
        .oneshot(post("/webhook", r#"{"address":"http://127.0.0.1:9/subscriber"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(json_body(response).await.get("id").is_some());
    assert_eq!(pipeline.stats().snapshot().accepted, 1);
}

#[tokio::test]
async fn webhook_rejects_missing_address_field() {
    let (pipeline, _coordinator, app) = start();

    let response = app
        .oneshot(post("/webhook", r#"{"addr":"x"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let report = pipeline.drain(Duration::from_secs(1)).await;
    assert_eq!(report.stats.accepted, 0);
    assert_eq!(report.stats.dispatch_attempts(), 0);
}

#[tokio::test]
async fn webhook_rejects_unparseable_and_empty_bodies() {
    let (pipeline, _coordinator, app) = start();

    for body in ["not json", "", r#"{"address":"   "}"#, r#"{"address":42}"#] {
        let response = app.clone().oneshot(post("/webhook", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body:?}");
    }
    assert_eq!(pipeline.stats().snapshot().accepted, 0);
}

#[tokio::test]
async fn webhook_refuses_work_once_draining() {
    let (pipeline, coordinator, app) = start();
    coordinator.begin_drain();

    let response = app
        .oneshot(post("/webhook", r#"{"address":"http://127.0.0.1:9/subscriber"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(pipeline.stats().snapshot().accepted, 0);
}

#[tokio::test]
async fn subscriber_answers_ok_even_for_garbage() {
    let (_pipeline, _coordinator, app) = start();

    let ok = app
        .clone()
        .oneshot(post("/subscriber", r#"{"payload":"aGVsbG8="}"#))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let garbage = app.oneshot(post("/subscriber", "{{{")).await.unwrap();
    assert_eq!(garbage.status(), StatusCode::OK);
}

#[tokio::test]
async fn cors_preflight_mirrors_origin() {
    let (_pipeline, _coordinator, app) = start();

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/webhook")
        .header("origin", "http://example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://example.com"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .unwrap(),
        "true"
    );
}
