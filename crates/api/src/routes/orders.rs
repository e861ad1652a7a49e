//! Order placement, confirmation and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use store::{OrderLine, OrderRecord, ReservationRecord, Store};

use crate::caller::caller_from_headers;
use crate::error::ApiError;
use crate::routes::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub lines: Vec<OrderLineRequest>,
    /// Payment was captured with the order: confirm it right away.
    #[serde(default)]
    pub pay_now: bool,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub state: String,
    pub lines: Vec<OrderLineResponse>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub reservation_id: Option<String>,
}

#[derive(Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<OrderRecord> for OrderResponse {
    fn from(order: OrderRecord) -> Self {
        Self {
            id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            state: order.state.to_string(),
            lines: order
                .lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                    reservation_id: line.reservation_id.map(|id| id.to_string()),
                })
                .collect(),
            failure_reason: order.failure_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version.as_i64(),
        }
    }
}

impl From<ReservationRecord> for ReservationResponse {
    fn from(reservation: ReservationRecord) -> Self {
        Self {
            id: reservation.id.to_string(),
            product_id: reservation.product_id.to_string(),
            quantity: reservation.quantity,
            state: reservation.state.to_string(),
            created_at: reservation.created_at,
            expires_at: reservation.expires_at,
        }
    }
}

// -- Handlers --

/// POST /orders: place an order, reserving stock for every line.
///
/// With `pay_now` an operator places and confirms in one step.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    let lines: Vec<OrderLine> = req
        .lines
        .into_iter()
        .map(|line| OrderLine::new(line.product_id, line.quantity))
        .collect();

    let order = if req.pay_now {
        state
            .orders
            .place_and_confirm(&caller, caller.customer_id, lines)
            .await?
    } else {
        state.orders.place_order(&caller, lines).await?
    };

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{id}: load an order.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let order_id = parse_order_id(&id)?;

    let order = state.orders.get_order(&caller, order_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/confirm: commit every reservation of a pending order.
#[tracing::instrument(skip(state, headers))]
pub async fn confirm<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let order_id = parse_order_id(&id)?;

    let order = state.orders.confirm_order(&caller, order_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel a pending order and release its stock.
#[tracing::instrument(skip(state, headers))]
pub async fn cancel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let order_id = parse_order_id(&id)?;

    let order = state.orders.cancel_order(&caller, order_id).await?;
    Ok(Json(order.into()))
}

/// GET /orders/{id}/reservations: the reservations backing an order.
#[tracing::instrument(skip(state, headers))]
pub async fn reservations<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let order_id = parse_order_id(&id)?;

    let reservations = state.orders.order_reservations(&caller, order_id).await?;
    Ok(Json(reservations.into_iter().map(Into::into).collect()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
