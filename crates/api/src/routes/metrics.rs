//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}

/// Registers help text for the metrics the core emits.
///
/// Call once after the recorder is installed.
pub fn describe() {
    metrics::describe_counter!(
        "ledger_reservations_total",
        "Stock reservations granted by the ledger"
    );
    metrics::describe_counter!(
        "ledger_insufficient_stock_total",
        "Reservations refused for lack of available stock"
    );
    metrics::describe_counter!(
        "ledger_stale_version_retries_total",
        "Ledger mutations retried after an optimistic version conflict"
    );
    metrics::describe_counter!(
        "ledger_concurrency_exhausted_total",
        "Ledger mutations that ran out of version-conflict retries"
    );
    metrics::describe_counter!(
        "store_stale_version_total",
        "Compare-and-swap writes rejected by the store"
    );
    metrics::describe_counter!(
        "reservations_expired_total",
        "Reservations expired by the sweep or on commit"
    );
    metrics::describe_counter!("reservation_sweeps_total", "Completed expiry sweeps");
    metrics::describe_counter!("orders_placed_total", "Orders placed with every line reserved");
    metrics::describe_counter!("orders_rejected_total", "Orders rejected during placement");
    metrics::describe_counter!("orders_confirmed_total", "Orders confirmed");
    metrics::describe_counter!("orders_failed_total", "Orders rolled back after a commit failure");
    metrics::describe_counter!("orders_cancelled_total", "Orders cancelled while pending");
    metrics::describe_histogram!(
        "order_confirm_duration_seconds",
        Unit::Seconds,
        "Time to commit every line of an order"
    );
}
