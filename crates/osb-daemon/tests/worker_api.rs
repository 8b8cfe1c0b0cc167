//! Orchestrator surface tests: worker registration lifecycle and the
//! behaviour of the public API when the fleet is empty.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::Service;

use osb_daemon::{
    cluster::{
        registry::WorkerRegistry,
        remote::{RemoteClient, RemoteConfig},
    },
    server::{public_router, AppState},
    worker::registry_router,
};
use osb_store::Store;

const WORKER_KEY: &str = "fleet-secret";

async fn orchestrator_app() -> (Router, Arc<WorkerRegistry>) {
    let store = Store::open_in_memory().await.expect("store");
    let registry = WorkerRegistry::load(store.clone()).await.expect("registry");
    let remote = RemoteClient::new(store, registry.clone(), RemoteConfig::default());

    let state = Arc::new(AppState {
        backend: Arc::new(remote),
        api_key: None,
        worker_api_key: Some(WORKER_KEY.to_string()),
        registry: Some(registry.clone()),
    });
    let app = public_router(state.clone()).merge(registry_router(state));
    (app, registry)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn registration_requires_the_worker_key() {
    let (mut app, _registry) = orchestrator_app().await;

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/internal/v1/workers/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({"url": "http://10.0.0.5:8080"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn register_list_deregister_round_trip() {
    let (mut app, registry) = orchestrator_app().await;

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/internal/v1/workers/register")
                .header("content-type", "application/json")
                .header("x-worker-key", WORKER_KEY)
                .body(Body::from(
                    serde_json::to_vec(&json!({"url": "http://10.0.0.5:8080"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let worker_id = body["worker_id"].as_str().expect("worker_id").to_string();
    assert!(worker_id.starts_with("wrk_"));

    let response = app
        .call(
            Request::builder()
                .uri("/internal/v1/workers")
                .header("x-worker-key", WORKER_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let workers = body_json(response).await;
    assert_eq!(workers.as_array().map(Vec::len), Some(1));
    assert_eq!(workers[0]["status"], "active");

    let response = app
        .call(
            Request::builder()
                .method("DELETE")
                .uri(format!("/internal/v1/workers/{worker_id}"))
                .header("x-worker-key", WORKER_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(registry.all().is_empty());

    // Deregistering a known worker again is tolerated; an unknown id is not.
    let response = app
        .call(
            Request::builder()
                .method("DELETE")
                .uri(format!("/internal/v1/workers/{worker_id}"))
                .header("x-worker-key", WORKER_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .call(
            Request::builder()
                .method("DELETE")
                .uri("/internal/v1/workers/wrk_0000000000000000")
                .header("x-worker-key", WORKER_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_without_workers_reports_the_condition() {
    let (mut app, _registry) = orchestrator_app().await;

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/v1/sandboxes")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_vec(&json!({"image": "alpine:latest"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["message"], "no workers registered");
}

#[tokio::test]
async fn empty_fleet_lists_no_sandboxes_or_images() {
    let (mut app, _registry) = orchestrator_app().await;

    for uri in ["/v1/sandboxes", "/v1/images"] {
        let response = app
            .call(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(0));
    }
}
