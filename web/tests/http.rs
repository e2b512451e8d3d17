//! Router tests driven through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use order_relay_core::{
    BoxFuture, ConnectionError, Order, OrderStore, PublishError, StoreError,
};
use order_relay_projections::KitchenOrderStore;
use order_relay_runtime::WorkerState;
use order_relay_testing::{RecordingPublisher, fixtures, test_clock};
use order_relay_web::{AppState, CORRELATION_ID_HEADER, router};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

struct Harness {
    store: Arc<KitchenOrderStore>,
    publisher: RecordingPublisher,
    worker: watch::Sender<WorkerState>,
    state: AppState,
}

impl Harness {
    fn new() -> Self {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();

        let store = Arc::new(KitchenOrderStore::new());
        let publisher = RecordingPublisher::new();
        let (worker, worker_state) = watch::channel(WorkerState::Subscribed);
        let state = AppState::new(store.clone(), Arc::new(publisher.clone()), worker_state)
            .with_clock(Arc::new(test_clock()));

        Self {
            store,
            publisher,
            worker,
            state,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

struct BrokenStore;

impl OrderStore for BrokenStore {
    fn upsert(&self, _order: Order) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Err(StoreError::Unavailable("disk on fire".to_string())) })
    }

    fn list_all(&self) -> BoxFuture<'_, Result<Vec<Order>, StoreError>> {
        Box::pin(async { Err(StoreError::Unavailable("disk on fire".to_string())) })
    }
}

#[tokio::test]
async fn test_kitchen_starts_empty() {
    let harness = Harness::new();

    let response = get(harness.app(), "/kitchen/orders").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([]));
}

#[tokio::test]
async fn test_kitchen_returns_consumed_order() {
    let harness = Harness::new();
    harness.store.upsert_order(fixtures::sample_order()).unwrap();

    let response = get(harness.app(), "/kitchen/orders").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([{
            "id": "o1",
            "customerName": "Ana",
            "table": "T3",
            "items": [{ "productName": "Hamburguesa", "quantity": 2, "unitPrice": 5.5 }],
            "createdAt": "2024-01-01T10:00:00Z"
        }])
    );
}

#[tokio::test]
async fn test_kitchen_orders_sorted_by_created_at() {
    let harness = Harness::new();
    harness
        .store
        .upsert_order(fixtures::order_at("b", "2024-01-01T11:00:00Z"))
        .unwrap();
    harness
        .store
        .upsert_order(fixtures::order_at("a", "2024-01-01T09:00:00Z"))
        .unwrap();

    let body = json_body(get(harness.app(), "/kitchen/orders").await).await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();

    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_kitchen_store_failure_is_500() {
    let harness = Harness::new();
    let state = AppState {
        store: Arc::new(BrokenStore),
        ..harness.state.clone()
    };

    let response = get(router(state), "/kitchen/orders").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
    assert!(!body["message"].as_str().unwrap().contains("fire"));
}

#[tokio::test]
async fn test_waiter_order_is_published() {
    let harness = Harness::new();

    let response = post_json(
        harness.app(),
        "/waiter/orders",
        r#"{"customerName":"Ana","table":"T3","items":[{"productName":"Hamburguesa","quantity":2,"unitPrice":5.5}]}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["customerName"], "Ana");
    assert_eq!(body["createdAt"], "2024-01-01T10:00:00Z");

    let published = harness.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id().as_str(), body["id"].as_str().unwrap());
    assert_eq!(published[0].items(), fixtures::new_order().items.as_slice());
}

#[tokio::test]
async fn test_waiter_order_without_items_is_422() {
    let harness = Harness::new();

    let response = post_json(
        harness.app(),
        "/waiter/orders",
        r#"{"customerName":"Ana","table":"T3","items":[]}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["code"], "VALIDATION_ERROR");
    assert!(harness.publisher.published().is_empty());
}

#[tokio::test]
async fn test_waiter_malformed_body_uses_error_shape() {
    let harness = Harness::new();

    let response = post_json(harness.app(), "/waiter/orders", "{not json").await;

    assert!(response.status().is_client_error());
    assert_eq!(json_body(response).await["code"], "INVALID_BODY");
    assert!(harness.publisher.published().is_empty());
}

#[tokio::test]
async fn test_waiter_publish_failure_is_503() {
    let harness = Harness::new();
    harness
        .publisher
        .fail_with(PublishError::Connection(ConnectionError::Unreachable {
            target: "amqp://guest@localhost:5672/".to_string(),
            reason: "connection refused".to_string(),
        }));

    let body = serde_json::to_string(&fixtures::new_order()).unwrap();
    let response = post_json(harness.app(), "/waiter/orders", &body).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "SERVICE_UNAVAILABLE");

    // The waiter retries once the broker is back
    harness.publisher.succeed();
    let response = post_json(harness.app(), "/waiter/orders", &body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(harness.publisher.published().len(), 1);
}

#[tokio::test]
async fn test_readiness_follows_worker_state() {
    let harness = Harness::new();

    let response = get(harness.app(), "/health/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "status": "ready", "worker": "subscribed" })
    );

    harness.worker.send_replace(WorkerState::Reconnecting);
    let response = get(harness.app(), "/health/ready").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        json_body(response).await,
        json!({ "status": "not_ready", "worker": "reconnecting" })
    );
}

#[tokio::test]
async fn test_liveness() {
    let harness = Harness::new();
    let response = get(harness.app(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let harness = Harness::new();

    let response = get(harness.app(), "/metrics").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = router(harness.state.clone().with_metrics(handle));
    let response = get(app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_responses_carry_correlation_id_and_cors() {
    let harness = Harness::new();

    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/kitchen/orders")
                .header(header::ORIGIN, "http://kitchen.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}
