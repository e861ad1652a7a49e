//! HTTP API server with observability for the order and inventory core.
//!
//! Provides REST endpoints for product stock and the order lifecycle,
//! with structured logging (tracing) and Prometheus metrics.

pub mod caller;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::{Clock, SystemClock};
use ledger::InventoryLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{OrderConfig, OrderCoordinator};
use reservations::ReservationManager;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/products/{id}/stock",
            post(routes::products::register::<S>)
                .get(routes::products::get::<S>)
                .delete(routes::products::discontinue::<S>),
        )
        .route(
            "/products/{id}/stock/adjust",
            post(routes::products::adjust::<S>),
        )
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/confirm", post(routes::orders::confirm::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/reservations",
            get(routes::orders::reservations::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the ledger, reservation manager and order coordinator over `store`.
pub fn create_state<S: Store>(store: S, config: &Config, clock: Arc<dyn Clock>) -> Arc<AppState<S>> {
    let ledger = InventoryLedger::with_policy(store, config.retry);
    let reservations = ReservationManager::new(ledger.clone(), clock);
    let orders = OrderCoordinator::new(
        reservations,
        OrderConfig {
            reservation_ttl: config.reservation_ttl,
        },
    );

    Arc::new(AppState { ledger, orders })
}

/// Creates the application state with default settings and the system clock.
pub fn create_default_state<S: Store>(store: S) -> Arc<AppState<S>> {
    create_state(store, &Config::default(), Arc::new(SystemClock))
}
