//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::CustomerId;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> Router {
    let state = api::create_default_state(InMemoryStore::new());
    api::create_app(state, get_metrics_handle())
}

/// Caller identity headers for a request.
struct As {
    customer_id: String,
    role: &'static str,
}

impl As {
    fn customer() -> Self {
        Self {
            customer_id: CustomerId::new().to_string(),
            role: "customer",
        }
    }

    fn operator() -> Self {
        Self {
            customer_id: CustomerId::new().to_string(),
            role: "operator",
        }
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Option<&As>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header("x-customer-id", caller.customer_id.as_str())
            .header("x-caller-role", caller.role);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register(app: &Router, operator: &As, product: &str, total: u32) {
    let (status, _) = send(
        app,
        "POST",
        &format!("/products/{product}/stock"),
        Some(operator),
        Some(json!({ "total": total })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn place(app: &Router, customer: &As, lines: Value) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/orders",
        Some(customer),
        Some(json!({ "lines": lines })),
    )
    .await
}

async fn stock(app: &Router, product: &str) -> Value {
    let (status, json) = send(app, "GET", &format!("/products/{product}/stock"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    json
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_register_and_adjust_stock() {
    let app = setup();
    let operator = As::operator();
    register(&app, &operator, "SKU-001", 10).await;

    let (status, json) = send(
        &app,
        "POST",
        "/products/SKU-001/stock/adjust",
        Some(&operator),
        Some(json!({ "delta": -4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 6);
    assert_eq!(json["available"], 6);
    assert_eq!(json["status"], "ACTIVE");

    let (status, _) = send(
        &app,
        "POST",
        "/products/SKU-001/stock",
        Some(&operator),
        Some(json!({ "total": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stock_changes_require_operator() {
    let app = setup();

    let (status, _) = send(
        &app,
        "POST",
        "/products/SKU-001/stock",
        Some(&As::customer()),
        Some(json!({ "total": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        "/products/SKU-001/stock",
        None,
        Some(json!({ "total": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_product_stock_is_not_found() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/products/SKU-404/stock", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_place_confirm_order() {
    let app = setup();
    let operator = As::operator();
    let customer = As::customer();
    register(&app, &operator, "SKU-001", 10).await;
    register(&app, &operator, "SKU-002", 5).await;

    let (status, order) = place(
        &app,
        &customer,
        json!([
            { "product_id": "SKU-001", "quantity": 2 },
            { "product_id": "SKU-002", "quantity": 1 }
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["state"], "PENDING");
    assert_eq!(order["customer_id"], customer.customer_id.as_str());
    assert_eq!(stock(&app, "SKU-001").await["reserved"], 2);

    let id = order["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/confirm"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, confirmed) = send(
        &app,
        "POST",
        &format!("/orders/{id}/confirm"),
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["state"], "CONFIRMED");

    let sku1 = stock(&app, "SKU-001").await;
    assert_eq!(sku1["total"], 8);
    assert_eq!(sku1["reserved"], 0);

    let (status, reservations) = send(
        &app,
        "GET",
        &format!("/orders/{id}/reservations"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reservations = reservations.as_array().unwrap();
    assert_eq!(reservations.len(), 2);
    assert!(reservations.iter().all(|r| r["state"] == "COMMITTED"));
}

#[tokio::test]
async fn test_rejected_order_releases_stock() {
    let app = setup();
    let operator = As::operator();
    let customer = As::customer();
    register(&app, &operator, "SKU-001", 10).await;
    register(&app, &operator, "SKU-002", 1).await;

    let (status, json) = place(
        &app,
        &customer,
        json!([
            { "product_id": "SKU-001", "quantity": 2 },
            { "product_id": "SKU-002", "quantity": 3 }
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("SKU-002"));
    assert_eq!(stock(&app, "SKU-001").await["reserved"], 0);
    assert_eq!(stock(&app, "SKU-002").await["reserved"], 0);
}

#[tokio::test]
async fn test_cancel_order() {
    let app = setup();
    let operator = As::operator();
    let customer = As::customer();
    register(&app, &operator, "SKU-001", 10).await;

    let (_, order) = place(
        &app,
        &customer,
        json!([{ "product_id": "SKU-001", "quantity": 4 }]),
    )
    .await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/cancel"),
        Some(&As::customer()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(
        &app,
        "POST",
        &format!("/orders/{id}/cancel"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "CANCELLED");
    assert_eq!(stock(&app, "SKU-001").await["reserved"], 0);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{id}/cancel"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_pay_now_confirms_immediately() {
    let app = setup();
    let operator = As::operator();
    register(&app, &operator, "SKU-001", 10).await;

    let (status, order) = send(
        &app,
        "POST",
        "/orders",
        Some(&operator),
        Some(json!({
            "lines": [{ "product_id": "SKU-001", "quantity": 3 }],
            "pay_now": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["state"], "CONFIRMED");
    assert_eq!(stock(&app, "SKU-001").await["total"], 7);
}

#[tokio::test]
async fn test_invalid_orders_are_bad_requests() {
    let app = setup();
    let customer = As::customer();

    let (status, _) = place(&app, &customer, json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/orders/not-a-uuid", Some(&customer), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();
    let id = uuid::Uuid::new_v4();
    let (status, _) = send(
        &app,
        "GET",
        &format!("/orders/{id}"),
        Some(&As::operator()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_discontinued_product_rejects_orders() {
    let app = setup();
    let operator = As::operator();
    register(&app, &operator, "SKU-001", 10).await;

    let (status, json) = send(
        &app,
        "DELETE",
        "/products/SKU-001/stock",
        Some(&operator),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "DISCONTINUED");

    let (status, _) = place(
        &app,
        &As::customer(),
        json!([{ "product_id": "SKU-001", "quantity": 1 }]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
